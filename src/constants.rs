/// File-name constants for candidate swath arrays.
/// A candidate is `<input>/<sample>/<category>/MYD021KM*.npy`.
pub const FILE_PREFIX: &str = "MYD021KM";
pub const FILE_EXTENSION: &str = "npy";

// Category labels, in dispatch order
pub const DAYLIGHT: &str = "daylight";
pub const NIGHT: &str = "night";
pub const CORRUPT: &str = "corrupt";

pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_CONVERTER_PROGRAM: &str = "convert-swath";

/// Environment variable naming a TOML config file
pub const CONFIG_ENV_VAR: &str = "DISPATCH_CONFIG";

pub const LOG_FILE_NAME: &str = "dispatch.log";

// Process exit codes
pub const EXIT_OK: u8 = 0;
pub const EXIT_ITEM_FAILURES: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;

/// Get the default category labels in dispatch order
pub fn default_categories() -> Vec<String> {
    vec![DAYLIGHT.to_string(), NIGHT.to_string(), CORRUPT.to_string()]
}

/// File-name glob matched inside each category directory
pub fn candidate_file_pattern() -> String {
    format!("{}*.{}", FILE_PREFIX, FILE_EXTENSION)
}
