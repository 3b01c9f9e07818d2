pub mod constants;
pub use constants::*;

pub mod bytes;
pub mod tracing_telemetry;

pub mod version;

pub use version::{raw_version_str, raw_version_string};
