//! Conversion orchestration for lockbridge.
//!
//! This crate ties the canonical model and the format codecs together into
//! the `Converter`, the API the CLI drives: import a lockfile in one format,
//! optionally restrict it to a set of platforms under the re-export policy,
//! and write it in another. It also provides the live-environment snapshot
//! adapter for conda prefixes, user configuration, and atomic file output.

pub mod atomic;
pub mod config;
pub mod convert;
pub mod snapshot;

pub use atomic::write_atomic;
pub use config::{ConfigError, ConverterConfig, CONFIG_ENV};
pub use convert::{select_platforms, Converter};
pub use snapshot::{snapshot_environment, EnvironmentSnapshot, PrefixSnapshot, SnapshotError};

use lockbridge_formats::{ParseError, RegistryError, SerializeError};
use lockbridge_schema::ValidationError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error("invalid environment: {0}")]
    Validation(#[from] ValidationError),
    #[error("no locked packages for platform(s) {requested}")]
    EmptyPlatformSelection { requested: String },
    #[error(
        "cannot re-export a lockfile locked for {locked} to {requested}; \
         lock the environment for the target platform instead"
    )]
    CrossPlatformReexport { requested: String, locked: String },
    #[error("cannot detect the lockfile format of {}; pass the format explicitly", path.display())]
    UndetectedFormat { path: PathBuf },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ConvertError {
    /// Export refused by the platform policy rather than by bad input.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            ConvertError::EmptyPlatformSelection { .. }
                | ConvertError::CrossPlatformReexport { .. }
        )
    }

    /// The document or format selection is at fault.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            ConvertError::Registry(_)
                | ConvertError::Parse(_)
                | ConvertError::Serialize(_)
                | ConvertError::Validation(_)
                | ConvertError::UndetectedFormat { .. }
        )
    }
}
