use crate::types::{HashAlgorithm, Origin, PackageName, Platform};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("a locked environment must cover at least one platform")]
    EmptyPlatforms,
    #[error("package '{name}' targets platform '{platform}', which the environment does not declare")]
    UndeclaredPlatform { name: String, platform: String },
    #[error("duplicate package entry (name '{name}', platform '{platform}', origin '{origin}')")]
    DuplicatePackage {
        name: String,
        platform: String,
        origin: Origin,
    },
}

/// Where a locked package archive is fetched from.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PackageSource {
    Url(String),
    Channel { channel: String, subdir: String },
}

impl PackageSource {
    pub fn url(&self) -> Option<&str> {
        match self {
            PackageSource::Url(url) => Some(url),
            PackageSource::Channel { .. } => None,
        }
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageSource::Url(url) => f.write_str(url),
            PackageSource::Channel { channel, subdir } => write!(f, "{channel}/{subdir}"),
        }
    }
}

/// Per-archive metadata that only some formats record.
///
/// Carried through verbatim so a document read and written in the same
/// format keeps it; formats without a place for it drop it on output.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ArchiveDetails {
    pub license_family: Option<String>,
    pub timestamp: Option<u64>,
    pub features: Option<String>,
    pub track_features: Vec<String>,
    pub python_site_packages_path: Option<String>,
    pub requires_python: Option<String>,
    /// Record keys no codec interprets, under their on-disk names.
    pub other: BTreeMap<String, serde_json::Value>,
}

impl ArchiveDetails {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One pinned package for one platform.
///
/// Built once through [`LockedPackage::new`] and the `with_*` setters, then
/// read-only: an environment validated over its entries stays valid.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LockedPackage {
    name: PackageName,
    version: String,
    build: Option<String>,
    platform: Platform,
    origin: Origin,
    source: PackageSource,
    integrity: BTreeMap<HashAlgorithm, String>,
    /// Dependency specifiers as the source recorded them; never re-resolved.
    dependencies: Vec<String>,
    constrains: Vec<String>,
    license: Option<String>,
    size: Option<u64>,
    category: String,
    optional: bool,
    details: ArchiveDetails,
}

/// The `(name, platform, origin)` triple that must be unique in an environment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageKey {
    pub name: String,
    pub platform: Platform,
    pub origin: Origin,
}

pub const DEFAULT_CATEGORY: &str = "main";

impl LockedPackage {
    pub fn new(
        name: impl Into<PackageName>,
        version: impl Into<String>,
        platform: impl Into<Platform>,
        origin: Origin,
        source: PackageSource,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            build: None,
            platform: platform.into(),
            origin,
            source,
            integrity: BTreeMap::new(),
            dependencies: Vec::new(),
            constrains: Vec::new(),
            license: None,
            size: None,
            category: DEFAULT_CATEGORY.to_owned(),
            optional: false,
            details: ArchiveDetails::default(),
        }
    }

    /// The same archive, locked for `platform`.
    #[must_use]
    pub fn with_platform(mut self, platform: impl Into<Platform>) -> Self {
        self.platform = platform.into();
        self
    }

    #[must_use]
    pub fn with_build(mut self, build: Option<String>) -> Self {
        self.build = build;
        self
    }

    #[must_use]
    pub fn with_hash(mut self, algorithm: HashAlgorithm, digest: impl Into<String>) -> Self {
        self.integrity.insert(algorithm, digest.into());
        self
    }

    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    #[must_use]
    pub fn with_constrains(mut self, constrains: Vec<String>) -> Self {
        self.constrains = constrains;
        self
    }

    #[must_use]
    pub fn with_license(mut self, license: Option<String>) -> Self {
        self.license = license;
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>, optional: bool) -> Self {
        self.category = category.into();
        self.optional = optional;
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: ArchiveDetails) -> Self {
        self.details = details;
        self
    }

    pub fn name(&self) -> &PackageName {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn build(&self) -> Option<&str> {
        self.build.as_deref()
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn source(&self) -> &PackageSource {
        &self.source
    }

    pub fn integrity(&self) -> &BTreeMap<HashAlgorithm, String> {
        &self.integrity
    }

    pub fn hash(&self, algorithm: HashAlgorithm) -> Option<&str> {
        self.integrity.get(&algorithm).map(String::as_str)
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn constrains(&self) -> &[String] {
        &self.constrains
    }

    pub fn license(&self) -> Option<&str> {
        self.license.as_deref()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn details(&self) -> &ArchiveDetails {
        &self.details
    }

    pub fn key(&self) -> PackageKey {
        PackageKey {
            name: self.name.normalized(self.origin),
            platform: self.platform.clone(),
            origin: self.origin,
        }
    }

    /// `name-version-build`, or `name-version` when there is no build string.
    pub fn display_spec(&self) -> String {
        match &self.build {
            Some(build) => format!("{}-{}-{build}", self.name, self.version),
            None => format!("{}-{}", self.name, self.version),
        }
    }
}

/// How a [`LockedEnvironment`] came into being.
///
/// Anything not built from a live environment counts as imported, which is
/// why that is the default.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    #[default]
    Imported,
    LiveSnapshot,
}

/// Format identifier and on-disk schema version a document was parsed from.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SourceFormat {
    pub identifier: String,
    pub schema_version: u32,
}

/// A PyPI `--find-links` location.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FindLinks {
    Url(String),
    Path(String),
}

/// Format-agnostic provenance data needed to write a valid document in any format.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct EnvironmentMetadata {
    pub channels: Vec<String>,
    pub pypi_indexes: Vec<String>,
    pub find_links: Vec<FindLinks>,
    /// Environment-level solver settings no codec interprets, under their
    /// on-disk names.
    pub solve_options: BTreeMap<String, serde_json::Value>,
    pub sources: Vec<String>,
    pub content_hash: BTreeMap<Platform, String>,
    /// Creation timestamp carried verbatim from the source document.
    pub created_at: Option<String>,
    pub source_format: Option<SourceFormat>,
    pub provenance: Provenance,
}

/// A fully pinned environment across one or more platforms.
///
/// Constructed only through [`LockedEnvironment::new`] or the builder, both of
/// which validate. There are no mutators; derived environments are new values.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LockedEnvironment {
    platforms: BTreeSet<Platform>,
    packages: Vec<LockedPackage>,
    metadata: EnvironmentMetadata,
}

impl LockedEnvironment {
    pub fn new(
        platforms: impl IntoIterator<Item = Platform>,
        packages: Vec<LockedPackage>,
        metadata: EnvironmentMetadata,
    ) -> Result<Self, ValidationError> {
        let platforms: BTreeSet<Platform> = platforms.into_iter().collect();
        validate(&platforms, &packages)?;
        Ok(Self {
            platforms,
            packages,
            metadata,
        })
    }

    pub fn builder() -> LockedEnvironmentBuilder {
        LockedEnvironmentBuilder::default()
    }

    pub fn platforms(&self) -> &BTreeSet<Platform> {
        &self.platforms
    }

    pub fn packages(&self) -> &[LockedPackage] {
        &self.packages
    }

    pub fn metadata(&self) -> &EnvironmentMetadata {
        &self.metadata
    }

    pub fn provenance(&self) -> Provenance {
        self.metadata.provenance
    }

    pub fn packages_for<'a>(
        &'a self,
        platform: &'a Platform,
    ) -> impl Iterator<Item = &'a LockedPackage> + 'a {
        self.packages.iter().filter(move |p| &p.platform == platform)
    }

    /// Derive an environment restricted to the platforms in `filter`.
    ///
    /// Fails with [`ValidationError::EmptyPlatforms`] when nothing overlaps.
    pub fn filter_platforms(&self, filter: &BTreeSet<Platform>) -> Result<Self, ValidationError> {
        let platforms: BTreeSet<Platform> =
            self.platforms.intersection(filter).cloned().collect();
        let packages: Vec<LockedPackage> = self
            .packages
            .iter()
            .filter(|p| platforms.contains(&p.platform))
            .cloned()
            .collect();
        let mut metadata = self.metadata.clone();
        metadata.content_hash.retain(|p, _| platforms.contains(p));
        Self::new(platforms, packages, metadata)
    }

    /// Equality over platforms and packages, ignoring metadata.
    pub fn same_packages(&self, other: &Self) -> bool {
        self.platforms == other.platforms && self.packages == other.packages
    }
}

#[derive(Debug, Default)]
pub struct LockedEnvironmentBuilder {
    platforms: BTreeSet<Platform>,
    packages: Vec<LockedPackage>,
    metadata: EnvironmentMetadata,
}

impl LockedEnvironmentBuilder {
    #[must_use]
    pub fn platform(mut self, platform: impl Into<Platform>) -> Self {
        self.platforms.insert(platform.into());
        self
    }

    #[must_use]
    pub fn package(mut self, package: LockedPackage) -> Self {
        self.packages.push(package);
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: EnvironmentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn build(self) -> Result<LockedEnvironment, ValidationError> {
        LockedEnvironment::new(self.platforms, self.packages, self.metadata)
    }
}

fn validate(
    platforms: &BTreeSet<Platform>,
    packages: &[LockedPackage],
) -> Result<(), ValidationError> {
    if platforms.is_empty() {
        return Err(ValidationError::EmptyPlatforms);
    }

    let mut seen: HashSet<PackageKey> = HashSet::with_capacity(packages.len());
    for pkg in packages {
        if !platforms.contains(&pkg.platform) {
            return Err(ValidationError::UndeclaredPlatform {
                name: pkg.name.to_string(),
                platform: pkg.platform.to_string(),
            });
        }
        if !seen.insert(pkg.key()) {
            return Err(ValidationError::DuplicatePackage {
                name: pkg.name.to_string(),
                platform: pkg.platform.to_string(),
                origin: pkg.origin,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numpy(platform: &str) -> LockedPackage {
        LockedPackage::new(
            "numpy",
            "1.26.0",
            platform,
            Origin::Conda,
            PackageSource::Url(format!(
                "https://conda.anaconda.org/conda-forge/{platform}/numpy-1.26.0-py312h1234_0.conda"
            )),
        )
        .with_build(Some("py312h1234_0".to_owned()))
    }

    #[test]
    fn builds_valid_environment() {
        let env = LockedEnvironment::builder()
            .platform("linux-64")
            .platform("win-64")
            .package(numpy("linux-64"))
            .package(numpy("win-64"))
            .build()
            .unwrap();
        assert_eq!(env.platforms().len(), 2);
        assert_eq!(env.packages().len(), 2);
        assert_eq!(env.provenance(), Provenance::Imported);
    }

    #[test]
    fn rejects_empty_platforms() {
        let err = LockedEnvironment::builder().build().unwrap_err();
        assert_eq!(err, ValidationError::EmptyPlatforms);
    }

    #[test]
    fn rejects_undeclared_platform() {
        let err = LockedEnvironment::builder()
            .platform("linux-64")
            .package(numpy("osx-64"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::UndeclaredPlatform { .. }));
    }

    #[test]
    fn rejects_duplicate_triple() {
        let err = LockedEnvironment::builder()
            .platform("linux-64")
            .package(numpy("linux-64"))
            .package(numpy("linux-64"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::DuplicatePackage {
                name: "numpy".to_owned(),
                platform: "linux-64".to_owned(),
                origin: Origin::Conda,
            }
        );
    }

    #[test]
    fn duplicate_detection_uses_normalized_names() {
        let upper = LockedPackage::new(
            "NumPy",
            "1.26.0",
            "linux-64",
            Origin::Conda,
            numpy("linux-64").source().clone(),
        );
        let err = LockedEnvironment::builder()
            .platform("linux-64")
            .package(numpy("linux-64"))
            .package(upper)
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::DuplicatePackage { .. }));
    }

    #[test]
    fn same_name_different_origin_is_allowed() {
        let pypi = LockedPackage::new(
            "numpy",
            "1.26.0",
            "linux-64",
            Origin::Pypi,
            PackageSource::Url("https://files.pythonhosted.org/numpy-1.26.0.whl".to_owned()),
        );
        let env = LockedEnvironment::builder()
            .platform("linux-64")
            .package(numpy("linux-64"))
            .package(pypi)
            .build();
        assert!(env.is_ok());
    }

    #[test]
    fn filter_produces_new_environment() {
        let env = LockedEnvironment::builder()
            .platform("linux-64")
            .platform("win-64")
            .package(numpy("linux-64"))
            .package(numpy("win-64"))
            .build()
            .unwrap();
        let filter: BTreeSet<Platform> = [Platform::new("win-64")].into_iter().collect();
        let filtered = env.filter_platforms(&filter).unwrap();
        assert_eq!(filtered.packages().len(), 1);
        assert_eq!(filtered.packages()[0].platform(), "win-64");
        // The original is untouched.
        assert_eq!(env.packages().len(), 2);
    }

    #[test]
    fn filter_without_overlap_is_empty_platforms() {
        let env = LockedEnvironment::builder()
            .platform("linux-64")
            .package(numpy("linux-64"))
            .build()
            .unwrap();
        let filter: BTreeSet<Platform> = [Platform::new("osx-64")].into_iter().collect();
        assert_eq!(
            env.filter_platforms(&filter).unwrap_err(),
            ValidationError::EmptyPlatforms
        );
    }

    #[test]
    fn display_spec_includes_build() {
        assert_eq!(numpy("linux-64").display_spec(), "numpy-1.26.0-py312h1234_0");
    }

    #[test]
    fn with_platform_keeps_everything_else() {
        let linux = numpy("linux-64").with_hash(HashAlgorithm::Md5, "ab".repeat(16));
        let win = linux.clone().with_platform("win-64");
        assert_eq!(win.platform(), "win-64");
        assert_eq!(win.build(), Some("py312h1234_0"));
        assert_eq!(win.hash(HashAlgorithm::Md5), linux.hash(HashAlgorithm::Md5));
        assert_eq!(win.content_digest(), linux.content_digest());
    }

    #[test]
    fn details_default_to_empty() {
        assert!(numpy("linux-64").details().is_empty());
        let details = ArchiveDetails {
            track_features: vec!["blas_mkl".to_owned()],
            ..ArchiveDetails::default()
        };
        let pkg = numpy("linux-64").with_details(details);
        assert!(!pkg.details().is_empty());
        assert_eq!(pkg.details().track_features, vec!["blas_mkl".to_owned()]);
    }

    #[test]
    fn channel_source_has_no_url() {
        let src = PackageSource::Channel {
            channel: "conda-forge".to_owned(),
            subdir: "linux-64".to_owned(),
        };
        assert!(src.url().is_none());
        assert_eq!(src.to_string(), "conda-forge/linux-64");
    }
}
