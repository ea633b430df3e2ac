pub mod completions;
pub mod convert;
pub mod export;
pub mod formats;
pub mod inspect;
pub mod man_pages;

use lockbridge_core::{ConfigError, ConvertError, Converter, ConverterConfig};
use lockbridge_schema::{LockedEnvironment, Origin, Platform};
use std::collections::BTreeSet;
use std::path::Path;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_LOCKFILE_ERROR: u8 = 2;
pub const EXIT_POLICY_VIOLATION: u8 = 3;

/// A command error with the process exit code it maps to.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self {
            code: EXIT_FAILURE,
            message,
        }
    }
}

impl From<ConvertError> for Failure {
    fn from(e: ConvertError) -> Self {
        let code = if e.is_policy_violation() {
            EXIT_POLICY_VIOLATION
        } else if e.is_format_error() {
            EXIT_LOCKFILE_ERROR
        } else {
            EXIT_FAILURE
        };
        Self {
            code,
            message: e.to_string(),
        }
    }
}

impl From<ConfigError> for Failure {
    fn from(e: ConfigError) -> Self {
        Self::from(format!("config: {e}"))
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn colorize_origin(origin: Origin) -> String {
    use console::Style;
    match origin {
        Origin::Conda => Style::new().green().apply_to(origin).to_string(),
        Origin::Pypi => Style::new().cyan().apply_to(origin).to_string(),
    }
}

/// `--platform` values as a filter; no values means no filter.
pub fn platform_filter(args: &[String]) -> Option<BTreeSet<Platform>> {
    if args.is_empty() {
        None
    } else {
        Some(args.iter().map(|p| Platform::new(p.as_str())).collect())
    }
}

/// Read `input`, limited to one named environment when `environment` is set.
pub fn import_input(
    converter: &Converter<'_>,
    input: &Path,
    from: Option<&str>,
    environment: Option<&str>,
) -> Result<LockedEnvironment, ConvertError> {
    match environment {
        Some(name) => converter.import_file_environment(input, from, name),
        None => converter.import_file(input, from),
    }
}

/// The explicit format, else the configured default.
pub fn output_format(explicit: Option<&str>, config: &ConverterConfig) -> Result<String, Failure> {
    explicit
        .map(str::to_owned)
        .or_else(|| config.default_format.clone())
        .ok_or_else(|| Failure {
            code: EXIT_LOCKFILE_ERROR,
            message: "no output format given and no default_format configured".to_owned(),
        })
}
