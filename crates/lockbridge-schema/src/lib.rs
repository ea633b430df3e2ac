//! Canonical locked-environment model for lockbridge.
//!
//! This crate defines the format-independent layer every lockfile codec
//! targets: the validated `LockedEnvironment` with its per-platform
//! `LockedPackage` entries, identifier newtypes (`Platform`, `PackageName`),
//! the closed `Origin` and `HashAlgorithm` sets, and blake3 content identity
//! used to de-duplicate archives shared across platforms.

pub mod identity;
pub mod model;
pub mod types;

pub use identity::EnvIdentity;
pub use model::{
    ArchiveDetails, EnvironmentMetadata, FindLinks, LockedEnvironment, LockedEnvironmentBuilder,
    LockedPackage, PackageKey, PackageSource, Provenance, SourceFormat, ValidationError,
    DEFAULT_CATEGORY,
};
pub use types::{ContentDigest, EnvFingerprint, HashAlgorithm, Origin, PackageName, Platform};
