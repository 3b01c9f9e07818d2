pub mod macros {
    /// Returns the package description.
    #[macro_export]
    macro_rules! package_description {
        () => {
            env!("CARGO_PKG_DESCRIPTION")
        };
    }

    /// Gets package's version info as a static str.
    #[macro_export]
    macro_rules! version_info_str {
        () => {
            concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
        };
    }

    /// Formats package related information.
    /// This includes the package name and version, and commit info.
    #[macro_export]
    macro_rules! fmt_package_info {
        () => {{
            format!(
                "{} {} ({})",
                $crate::package_description!(),
                $crate::version_info_str!(),
                $crate::raw_version_str()
            )
        }};
    }

    /// Prints package related information.
    #[macro_export]
    macro_rules! print_package_info {
        () => {
            println!("{}", $crate::fmt_package_info!());
        };
    }
}

/// Analogous to `raw_version_str` but owned.
pub fn raw_version_string() -> String {
    String::from(raw_version_str())
}

/// The build's revision, taken from `GIT_VERSION` at build time when set.
pub fn raw_version_str() -> &'static str {
    option_env!("GIT_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}
