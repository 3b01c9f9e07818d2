use snafu::{ResultExt, Snafu};

/// Errors from parsing a human readable size.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum ParseSizeError {
    #[snafu(display("Size '{}' must start with a number", input))]
    MissingNumber { input: String },
    #[snafu(display("Size '{}' has an invalid number: {}", input, source))]
    InvalidNumber {
        input: String,
        source: std::num::ParseIntError,
    },
    #[snafu(display("Size '{}' has an unknown unit '{}'", input, unit))]
    UnknownUnit { input: String, unit: String },
    #[snafu(display("Size '{}' does not fit in 64 bits", input))]
    Overflow { input: String },
}

/// Converts a human readable size such as `10G`, `512Mi` or `4096` into bytes.
/// Units are powers of 1024 regardless of an `i` in the suffix and are
/// case-insensitive. A bare number is taken as bytes.
pub fn convert_to_bytes(input: &str) -> Result<u64, ParseSizeError> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    if split == 0 {
        return MissingNumber { input }.fail();
    }
    let (digits, unit) = trimmed.split_at(split);
    let number = digits.parse::<u64>().context(InvalidNumber { input })?;

    let unit = unit.trim();
    let unit = unit.split('i').next().unwrap_or_default().to_lowercase();
    let shift = match unit.as_str() {
        "" | "b" => 0,
        "k" | "kb" => 10,
        "m" | "mb" => 20,
        "g" | "gb" => 30,
        "t" | "tb" => 40,
        "p" | "pb" => 50,
        _ => return UnknownUnit { input, unit }.fail(),
    };
    match number.checked_mul(1u64 << shift) {
        Some(bytes) => Ok(bytes),
        None => Overflow { input }.fail(),
    }
}

/// Converts bytes to human-readable values.
pub fn into_human(bytes: u64) -> String {
    const SUFFIX: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

    let mut size = bytes as f64;
    let mut index = 0;
    while size >= 1024.0 && index < SUFFIX.len() - 1 {
        size /= 1024.0;
        index += 1;
    }
    if index == 0 {
        return format!("{bytes} B");
    }
    let prefix = format!("{size:.1}");
    format!("{}{}", prefix.trim_end_matches(".0"), SUFFIX[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_numbers_are_bytes() {
        assert_eq!(convert_to_bytes("4096"), Ok(4096));
        assert_eq!(convert_to_bytes(" 12 "), Ok(12));
    }

    #[test]
    fn units_are_binary() {
        assert_eq!(convert_to_bytes("1k"), Ok(1024));
        assert_eq!(convert_to_bytes("1KB"), Ok(1024));
        assert_eq!(convert_to_bytes("1Ki"), Ok(1024));
        assert_eq!(convert_to_bytes("2M"), Ok(2 << 20));
        assert_eq!(convert_to_bytes("2MiB"), Ok(2 << 20));
        assert_eq!(convert_to_bytes("10G"), Ok(10 << 30));
        assert_eq!(convert_to_bytes("10 gb"), Ok(10 << 30));
        assert_eq!(convert_to_bytes("1T"), Ok(1 << 40));
        assert_eq!(convert_to_bytes("3Pi"), Ok(3 << 50));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            convert_to_bytes("G10"),
            Err(ParseSizeError::MissingNumber { .. })
        ));
        assert!(matches!(
            convert_to_bytes(""),
            Err(ParseSizeError::MissingNumber { .. })
        ));
        assert!(matches!(
            convert_to_bytes("10X"),
            Err(ParseSizeError::UnknownUnit { .. })
        ));
        assert!(matches!(
            convert_to_bytes("99999999999999999999"),
            Err(ParseSizeError::InvalidNumber { .. })
        ));
        assert!(matches!(
            convert_to_bytes("100000P"),
            Err(ParseSizeError::Overflow { .. })
        ));
    }

    #[test]
    fn human_sizes() {
        assert_eq!(into_human(0), "0 B");
        assert_eq!(into_human(1024), "1KiB");
        assert_eq!(into_human(1536), "1.5KiB");
        assert_eq!(into_human(1 << 30), "1GiB");
    }
}
