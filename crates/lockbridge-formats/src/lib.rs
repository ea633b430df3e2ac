//! Lockfile codecs and the format registry for lockbridge.
//!
//! Each supported on-disk schema gets one module with a `parse` function
//! (text to validated `LockedEnvironment`) and a `serialize` function (the
//! inverse). `FormatRegistry` maps stable identifiers such as
//! `conda-lock-v1` and `pixi-lock-v6` to those function pairs.

pub mod archive;
pub mod conda_lock_v1;
pub mod pixi_lock_v6;
pub mod registry;

pub use registry::{
    global, init_global, EnvironmentParseFn, FormatDescriptor, FormatRegistry, ParseFn,
    RegistryError, SerializeFn, BUILTIN_FORMATS,
};

use lockbridge_schema::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{format}: malformed document: {source}")]
    Yaml {
        format: &'static str,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{format}: unsupported schema version {found}, expected {expected}")]
    UnsupportedVersion {
        format: &'static str,
        found: u64,
        expected: u32,
    },
    #[error("{format}: missing required field '{path}'")]
    MissingField { format: &'static str, path: String },
    #[error("{format}: invalid field '{path}': {reason}")]
    InvalidField {
        format: &'static str,
        path: String,
        reason: String,
    },
    #[error("{format}: unknown package manager '{manager}' at '{path}'")]
    UnknownManager {
        format: &'static str,
        path: String,
        manager: String,
    },
    #[error("{format}: '{path}' references '{url}', which is not in the package table")]
    DanglingReference {
        format: &'static str,
        path: String,
        url: String,
    },
    #[error("{format}: environment '{name}' not found (available: {available})")]
    UnknownEnvironment {
        format: &'static str,
        name: String,
        available: String,
    },
    #[error("{format}: the format stores a single unnamed environment")]
    NoNamedEnvironments { format: &'static str },
    #[error("{format}: {source}")]
    Validation {
        format: &'static str,
        #[source]
        source: ValidationError,
    },
}

impl ParseError {
    /// True for a well-formed document that declares a schema version we do not read.
    pub fn is_unsupported_version(&self) -> bool {
        matches!(self, ParseError::UnsupportedVersion { .. })
    }
}

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("{format}: package '{package}' for '{platform}' has no download URL")]
    MissingUrl {
        format: &'static str,
        package: String,
        platform: String,
    },
    #[error("{format}: cannot merge records for '{package}': {reason}")]
    Irreconcilable {
        format: &'static str,
        package: String,
        reason: String,
    },
    #[error("{format}: failed to emit YAML: {source}")]
    Yaml {
        format: &'static str,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Read the top-level `version` of a YAML document without interpreting the rest.
pub fn sniff_version(text: &str) -> Option<u64> {
    let document: serde_yaml::Value = serde_yaml::from_str(text).ok()?;
    document.get("version")?.as_u64()
}

/// Fail fast unless the document declares exactly `expected` as its version.
pub(crate) fn check_version(
    format: &'static str,
    text: &str,
    expected: u32,
) -> Result<(), ParseError> {
    let document: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|source| ParseError::Yaml { format, source })?;
    let Some(version) = document.get("version") else {
        return Err(ParseError::MissingField {
            format,
            path: "version".to_owned(),
        });
    };
    let Some(found) = version.as_u64() else {
        return Err(ParseError::InvalidField {
            format,
            path: "version".to_owned(),
            reason: format!("expected an integer, found {version:?}"),
        });
    };
    if found != u64::from(expected) {
        tracing::debug!("{format}: rejecting document with version {found}");
        return Err(ParseError::UnsupportedVersion {
            format,
            found,
            expected,
        });
    }
    Ok(())
}
