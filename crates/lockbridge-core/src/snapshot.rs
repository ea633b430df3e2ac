//! Live-environment snapshots.
//!
//! An [`EnvironmentSnapshot`] lists what is installed in an environment; the
//! snapshot is turned into a validated [`LockedEnvironment`] with
//! [`Provenance::LiveSnapshot`], which is the only kind of environment the
//! exporter allows to be locked for a platform it was not read from.

use lockbridge_schema::{
    EnvironmentMetadata, HashAlgorithm, LockedEnvironment, LockedPackage, Origin, PackageSource,
    Platform, Provenance, ValidationError,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("{} is not a conda environment (no conda-meta directory)", .0.display())]
    NotAPrefix(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid package record {}: {source}", path.display())]
    Record {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("package record {} has neither a url nor a channel", path.display())]
    MissingSource { path: PathBuf },
    #[error("cannot determine the environment platform; set one explicitly")]
    UnknownPlatform,
    #[error("invalid environment: {0}")]
    Validation(#[from] ValidationError),
}

/// A source of installed-package listings for one environment.
pub trait EnvironmentSnapshot {
    /// The single platform the environment is installed for.
    fn platform(&self) -> Result<Platform, SnapshotError>;

    fn channels(&self) -> Result<Vec<String>, SnapshotError>;

    /// Installed packages, each already assigned to [`Self::platform`].
    fn installed_packages(&self) -> Result<Vec<LockedPackage>, SnapshotError>;
}

/// Build a validated live-snapshot environment from `source`.
pub fn snapshot_environment(
    source: &dyn EnvironmentSnapshot,
) -> Result<LockedEnvironment, SnapshotError> {
    let platform = source.platform()?;
    let packages = source.installed_packages()?;
    info!(
        "snapshot: {} installed packages for {platform}",
        packages.len()
    );

    let metadata = EnvironmentMetadata {
        channels: source.channels()?,
        provenance: Provenance::LiveSnapshot,
        ..EnvironmentMetadata::default()
    };
    Ok(LockedEnvironment::new([platform], packages, metadata)?)
}

/// One `conda-meta/<name>-<version>-<build>.json` record.
#[derive(Debug, Clone, Deserialize)]
struct PrefixRecord {
    name: String,
    version: String,
    #[serde(default)]
    build: Option<String>,
    #[serde(default)]
    subdir: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    md5: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    depends: Vec<String>,
    #[serde(default)]
    constrains: Vec<String>,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

/// Snapshot of a conda prefix, read from its `conda-meta` directory.
///
/// The directory is read on first use and the records are kept for the
/// lifetime of the snapshot.
#[derive(Debug, Clone)]
pub struct PrefixSnapshot {
    prefix: PathBuf,
    platform: Option<Platform>,
    channels: Vec<String>,
    records: OnceLock<Vec<(PathBuf, PrefixRecord)>>,
}

impl PrefixSnapshot {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            platform: None,
            channels: Vec::new(),
            records: OnceLock::new(),
        }
    }

    /// Lock for `platform` instead of the one recorded in the prefix.
    #[must_use]
    pub fn with_platform(mut self, platform: Option<Platform>) -> Self {
        self.platform = platform;
        self
    }

    /// Channels to record when the package records do not name any.
    #[must_use]
    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    fn meta_dir(&self) -> PathBuf {
        self.prefix.join("conda-meta")
    }

    fn records(&self) -> Result<&[(PathBuf, PrefixRecord)], SnapshotError> {
        if let Some(records) = self.records.get() {
            return Ok(records.as_slice());
        }
        let records = self.read_records()?;
        Ok(self.records.get_or_init(|| records).as_slice())
    }

    fn read_records(&self) -> Result<Vec<(PathBuf, PrefixRecord)>, SnapshotError> {
        let meta_dir = self.meta_dir();
        if !meta_dir.is_dir() {
            return Err(SnapshotError::NotAPrefix(self.prefix.clone()));
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&meta_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            let record: PrefixRecord = serde_json::from_str(&content)
                .map_err(|source| SnapshotError::Record {
                    path: path.clone(),
                    source,
                })?;
            records.push((path, record));
        }
        records.sort_by(|(_, a), (_, b)| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        debug!(
            "read {} package records from {}",
            records.len(),
            meta_dir.display()
        );
        Ok(records)
    }
}

impl EnvironmentSnapshot for PrefixSnapshot {
    /// The explicit platform, else the first architecture-specific subdir
    /// among the installed records, else the host platform.
    fn platform(&self) -> Result<Platform, SnapshotError> {
        if let Some(platform) = &self.platform {
            return Ok(platform.clone());
        }
        let recorded = self
            .records()?
            .iter()
            .filter_map(|(_, r)| r.subdir.as_deref())
            .map(Platform::new)
            .find(|p| !p.is_noarch());
        recorded
            .or_else(Platform::host)
            .ok_or(SnapshotError::UnknownPlatform)
    }

    fn channels(&self) -> Result<Vec<String>, SnapshotError> {
        let mut channels: Vec<String> = Vec::new();
        for channel in self.records()?.iter().filter_map(|(_, r)| r.channel.as_ref()) {
            if !channels.contains(channel) {
                channels.push(channel.clone());
            }
        }
        if channels.is_empty() {
            channels.clone_from(&self.channels);
        }
        Ok(channels)
    }

    fn installed_packages(&self) -> Result<Vec<LockedPackage>, SnapshotError> {
        let platform = self.platform()?;
        let mut packages = Vec::new();
        for (path, record) in self.records()?.iter().cloned() {
            let source = match (record.url, record.channel) {
                (Some(url), _) => PackageSource::Url(url),
                (None, Some(channel)) => PackageSource::Channel {
                    channel,
                    subdir: record.subdir.unwrap_or_else(|| platform.to_string()),
                },
                (None, None) => return Err(SnapshotError::MissingSource { path }),
            };

            // noarch packages are installed for, and locked under, the prefix platform.
            let mut pkg = LockedPackage::new(
                record.name,
                record.version,
                platform.clone(),
                Origin::Conda,
                source,
            )
            .with_build(record.build)
            .with_dependencies(record.depends)
            .with_constrains(record.constrains)
            .with_license(record.license)
            .with_size(record.size);
            if let Some(md5) = record.md5 {
                pkg = pkg.with_hash(HashAlgorithm::Md5, md5);
            }
            if let Some(sha256) = record.sha256 {
                pkg = pkg.with_hash(HashAlgorithm::Sha256, sha256);
            }
            packages.push(pkg);
        }
        Ok(packages)
    }
}
