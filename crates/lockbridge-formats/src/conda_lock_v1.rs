//! conda-lock v1 (`conda-lock.yml`).
//!
//! A flat list of package records, each tagged with its own platform and
//! manager, under a root `metadata` block declaring channels and platforms.

use crate::archive::parse_conda_url;
use crate::registry::FormatDescriptor;
use crate::{check_version, ParseError, SerializeError};
use indexmap::IndexMap;
use lockbridge_schema::{
    EnvironmentMetadata, HashAlgorithm, LockedEnvironment, LockedPackage, Origin, PackageSource,
    Platform, SourceFormat, DEFAULT_CATEGORY,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const FORMAT: &str = "conda-lock-v1";
pub const SCHEMA_VERSION: u32 = 1;
pub const CONDA_LOCK_FILE: &str = "conda-lock.yml";
pub const DEFAULT_FILENAMES: &[&str] = &[CONDA_LOCK_FILE];

pub const DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    identifier: FORMAT,
    aliases: &[],
    schema_version: SCHEMA_VERSION,
    default_filenames: DEFAULT_FILENAMES,
    description: "conda-lock unified lockfile, version 1",
    parser: parse,
    environment_parser: None,
    serializer: serialize,
};

const MANAGER_CONDA: &str = "conda";
const MANAGER_PIP: &str = "pip";

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CondaLockV1 {
    version: u32,
    metadata: Metadata,
    package: Vec<PackageRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    #[serde(default)]
    content_hash: BTreeMap<String, String>,
    #[serde(default)]
    channels: Vec<ChannelEntry>,
    platforms: Vec<String>,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_metadata: Option<TimeMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    custom_metadata: Option<serde_yaml::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChannelEntry {
    url: String,
    #[serde(default)]
    used_env_vars: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TimeMetadata {
    created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PackageRecord {
    name: String,
    version: String,
    manager: String,
    platform: String,
    #[serde(default)]
    dependencies: IndexMap<String, String>,
    url: String,
    #[serde(default)]
    hash: HashEntry,
    #[serde(default = "default_category")]
    category: String,
    #[serde(default)]
    optional: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HashEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_owned()
}

pub fn parse(text: &str) -> Result<LockedEnvironment, ParseError> {
    check_version(FORMAT, text, SCHEMA_VERSION)?;
    let doc: CondaLockV1 = serde_yaml::from_str(text).map_err(|source| ParseError::Yaml {
        format: FORMAT,
        source,
    })?;

    let mut packages = Vec::with_capacity(doc.package.len());
    for (index, record) in doc.package.into_iter().enumerate() {
        packages.push(record_to_package(index, record)?);
    }

    let metadata = EnvironmentMetadata {
        channels: doc.metadata.channels.into_iter().map(|c| c.url).collect(),
        pypi_indexes: Vec::new(),
        sources: doc.metadata.sources,
        content_hash: doc
            .metadata
            .content_hash
            .into_iter()
            .map(|(platform, hash)| (Platform::new(platform), hash))
            .collect(),
        created_at: doc.metadata.time_metadata.map(|t| t.created_at),
        source_format: Some(SourceFormat {
            identifier: FORMAT.to_owned(),
            schema_version: SCHEMA_VERSION,
        }),
        ..EnvironmentMetadata::default()
    };

    debug!(
        "{FORMAT}: parsed {} records across {} platforms",
        packages.len(),
        doc.metadata.platforms.len()
    );

    LockedEnvironment::new(
        doc.metadata.platforms.into_iter().map(Platform::new),
        packages,
        metadata,
    )
    .map_err(|source| ParseError::Validation {
        format: FORMAT,
        source,
    })
}

fn record_to_package(index: usize, record: PackageRecord) -> Result<LockedPackage, ParseError> {
    let origin = match record.manager.as_str() {
        MANAGER_CONDA => Origin::Conda,
        // conda-lock writes `pip`; accept the ecosystem name as well.
        MANAGER_PIP | "pypi" => Origin::Pypi,
        other => {
            return Err(ParseError::UnknownManager {
                format: FORMAT,
                path: format!("package[{index}].manager"),
                manager: other.to_owned(),
            })
        }
    };

    if record.url.trim().is_empty() {
        return Err(ParseError::InvalidField {
            format: FORMAT,
            path: format!("package[{index}].url"),
            reason: "must not be empty".to_owned(),
        });
    }

    let build = match origin {
        Origin::Conda => parse_conda_url(&record.url).map(|a| a.build.to_owned()),
        Origin::Pypi => None,
    };

    let dependencies = record
        .dependencies
        .into_iter()
        .map(|(name, spec)| join_dependency(&name, &spec))
        .collect();

    let mut pkg = LockedPackage::new(
        record.name,
        record.version,
        record.platform,
        origin,
        PackageSource::Url(record.url),
    )
    .with_build(build)
    .with_dependencies(dependencies)
    .with_category(record.category, record.optional);

    if let Some(md5) = record.hash.md5 {
        pkg = pkg.with_hash(HashAlgorithm::Md5, md5);
    }
    if let Some(sha256) = record.hash.sha256 {
        pkg = pkg.with_hash(HashAlgorithm::Sha256, sha256);
    }
    Ok(pkg)
}

pub fn serialize(env: &LockedEnvironment) -> Result<String, SerializeError> {
    let mut package = Vec::with_capacity(env.packages().len());
    for pkg in env.packages() {
        package.push(package_to_record(pkg)?);
    }

    let meta = env.metadata();
    let mut custom_metadata = serde_yaml::Mapping::new();
    custom_metadata.insert(
        "created_by".into(),
        format!("lockbridge {}", env!("CARGO_PKG_VERSION")).into(),
    );

    let doc = CondaLockV1 {
        version: SCHEMA_VERSION,
        metadata: Metadata {
            content_hash: meta
                .content_hash
                .iter()
                .map(|(p, h)| (p.to_string(), h.clone()))
                .collect(),
            channels: meta
                .channels
                .iter()
                .map(|url| ChannelEntry {
                    url: url.clone(),
                    used_env_vars: Vec::new(),
                })
                .collect(),
            platforms: env.platforms().iter().map(ToString::to_string).collect(),
            sources: meta.sources.clone(),
            time_metadata: meta
                .created_at
                .clone()
                .map(|created_at| TimeMetadata { created_at }),
            custom_metadata: Some(serde_yaml::Value::Mapping(custom_metadata)),
        },
        package,
    };

    debug!("{FORMAT}: writing {} records", doc.package.len());
    serde_yaml::to_string(&doc).map_err(|source| SerializeError::Yaml {
        format: FORMAT,
        source,
    })
}

fn package_to_record(pkg: &LockedPackage) -> Result<PackageRecord, SerializeError> {
    let Some(url) = pkg.source().url() else {
        return Err(SerializeError::MissingUrl {
            format: FORMAT,
            package: pkg.display_spec(),
            platform: pkg.platform().to_string(),
        });
    };

    let manager = match pkg.origin() {
        Origin::Conda => MANAGER_CONDA,
        Origin::Pypi => MANAGER_PIP,
    };

    let mut dependencies: IndexMap<String, String> =
        IndexMap::with_capacity(pkg.dependencies().len());
    for dep in pkg.dependencies() {
        let (name, spec) = split_dependency(dep);
        match dependencies.get(name) {
            None => {
                dependencies.insert(name.to_owned(), spec.to_owned());
            }
            Some(existing) if existing == spec => {}
            Some(_) => {
                return Err(SerializeError::Irreconcilable {
                    format: FORMAT,
                    package: pkg.display_spec(),
                    reason: format!("dependency '{name}' is listed more than once"),
                });
            }
        }
    }
    if !pkg.details().is_empty() {
        debug!(
            "{FORMAT}: dropping archive details of {} (no place for them in this format)",
            pkg.display_spec()
        );
    }

    Ok(PackageRecord {
        name: pkg.name().to_string(),
        version: pkg.version().to_owned(),
        manager: manager.to_owned(),
        platform: pkg.platform().to_string(),
        dependencies,
        url: url.to_owned(),
        hash: HashEntry {
            md5: pkg.hash(HashAlgorithm::Md5).map(str::to_owned),
            sha256: pkg.hash(HashAlgorithm::Sha256).map(str::to_owned),
        },
        category: pkg.category().to_owned(),
        optional: pkg.is_optional(),
    })
}

fn join_dependency(name: &str, spec: &str) -> String {
    let spec = spec.trim();
    if spec.is_empty() {
        name.to_owned()
    } else {
        format!("{name} {spec}")
    }
}

/// Split a dependency into the package name and the rest of the specifier.
///
/// The name ends at the first character a conda or PEP 508 name cannot
/// contain, so `python >=3.9`, `charset-normalizer<4,>=2` and
/// `pysocks!=1.5.7 ; extra == 'socks'` all split after the name.
fn split_dependency(dep: &str) -> (&str, &str) {
    let dep = dep.trim();
    let end = dep
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        .unwrap_or(dep.len());
    let (name, spec) = dep.split_at(end);
    (name, spec.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"version: 1
metadata:
  content_hash:
    linux-64: 5f1c0a
  channels:
  - url: conda-forge
    used_env_vars: []
  platforms:
  - linux-64
  sources:
  - environment.yml
package:
- name: python
  version: 3.12.1
  manager: conda
  platform: linux-64
  dependencies:
    libzlib: '>=1.2.13,<2.0.0a0'
    tzdata: ''
  url: https://conda.anaconda.org/conda-forge/linux-64/python-3.12.1-hab00c5b_1_cpython.conda
  hash:
    md5: 0bab699354cbd66959550eb9b9866620
    sha256: 7b4ba2c5e3b8f4f0a6d6f0b2f3d3c1a0e6e3a7e3b9c4d1a2f3e4d5c6b7a8f9e0
  category: main
  optional: false
- name: requests
  version: 2.31.0
  manager: pip
  platform: linux-64
  dependencies:
    urllib3: '>=1.21.1,<3'
  url: https://files.pythonhosted.org/packages/70/8e/requests-2.31.0-py3-none-any.whl
  hash:
    sha256: 58cd2187c01e70e6e26505bca751777aa9f2ee0b7f4300988b709f44e013003f
  category: main
  optional: false
";

    #[test]
    fn parses_records() {
        let env = parse(SAMPLE).unwrap();
        assert_eq!(env.platforms().len(), 1);
        assert_eq!(env.packages().len(), 2);

        let python = &env.packages()[0];
        assert_eq!(python.name(), "python");
        assert_eq!(python.origin(), Origin::Conda);
        assert_eq!(python.build(), Some("hab00c5b_1_cpython"));
        assert_eq!(
            python.dependencies(),
            ["libzlib >=1.2.13,<2.0.0a0".to_owned(), "tzdata".to_owned()]
        );
        assert_eq!(python.integrity().len(), 2);

        let requests = &env.packages()[1];
        assert_eq!(requests.origin(), Origin::Pypi);
        assert_eq!(requests.build(), None);
        assert_eq!(
            requests.hash(HashAlgorithm::Sha256),
            Some("58cd2187c01e70e6e26505bca751777aa9f2ee0b7f4300988b709f44e013003f")
        );
    }

    #[test]
    fn parses_metadata() {
        let env = parse(SAMPLE).unwrap();
        let meta = env.metadata();
        assert_eq!(meta.channels, vec!["conda-forge".to_owned()]);
        assert_eq!(meta.sources, vec!["environment.yml".to_owned()]);
        assert_eq!(
            meta.content_hash.get(&Platform::new("linux-64")).map(String::as_str),
            Some("5f1c0a")
        );
        assert_eq!(
            meta.source_format.as_ref().map(|s| s.identifier.as_str()),
            Some(FORMAT)
        );
    }

    #[test]
    fn roundtrip_is_stable() {
        let env = parse(SAMPLE).unwrap();
        let text = serialize(&env).unwrap();
        let reparsed = parse(&text).unwrap();
        assert_eq!(env, reparsed);
        // A second pass produces identical text.
        assert_eq!(text, serialize(&reparsed).unwrap());
    }

    #[test]
    fn writes_pip_manager_tag() {
        let text = serialize(&parse(SAMPLE).unwrap()).unwrap();
        assert!(text.contains("manager: pip"));
        assert!(text.contains("manager: conda"));
        assert!(text.contains("created_by: lockbridge"));
    }

    #[test]
    fn rejects_version_2() {
        let doc = SAMPLE.replacen("version: 1", "version: 2", 1);
        let err = parse(&doc).unwrap_err();
        assert!(err.is_unsupported_version(), "got {err}");
    }

    #[test]
    fn rejects_unknown_manager() {
        let doc = SAMPLE.replace("manager: pip", "manager: cargo");
        let err = parse(&doc).unwrap_err();
        assert!(matches!(err, ParseError::UnknownManager { ref manager, .. } if manager == "cargo"));
    }

    #[test]
    fn rejects_duplicate_triple() {
        let doc = SAMPLE.replace("name: requests", "name: python").replace("manager: pip", "manager: conda");
        let err = parse(&doc).unwrap_err();
        assert!(matches!(err, ParseError::Validation { .. }), "got {err}");
        assert!(err.to_string().contains("python"));
    }

    #[test]
    fn rejects_undeclared_platform() {
        let doc = SAMPLE.replacen("platform: linux-64", "platform: osx-64", 1);
        let err = parse(&doc).unwrap_err();
        assert!(matches!(err, ParseError::Validation { .. }));
    }

    #[test]
    fn rejects_missing_url() {
        let doc = SAMPLE.replace(
            "  url: https://files.pythonhosted.org/packages/70/8e/requests-2.31.0-py3-none-any.whl\n",
            "",
        );
        let err = parse(&doc).unwrap_err();
        assert!(matches!(err, ParseError::Yaml { .. }));
        assert!(err.to_string().contains("url"));
    }

    #[test]
    fn rejects_unknown_root_key() {
        let doc = format!("{SAMPLE}extra: true\n");
        assert!(parse(&doc).is_err());
    }

    #[test]
    fn splits_dependencies_after_the_name() {
        assert_eq!(split_dependency("python >=3.9,<3.13"), ("python", ">=3.9,<3.13"));
        assert_eq!(split_dependency("numpy 1.26.* py312*"), ("numpy", "1.26.* py312*"));
        assert_eq!(split_dependency("tzdata"), ("tzdata", ""));
        assert_eq!(
            split_dependency("charset-normalizer<4,>=2"),
            ("charset-normalizer", "<4,>=2")
        );
        assert_eq!(
            split_dependency("pysocks!=1.5.7,>=1.5.6 ; extra == 'socks'"),
            ("pysocks", "!=1.5.7,>=1.5.6 ; extra == 'socks'")
        );
        assert_eq!(split_dependency("requests[socks]>=2"), ("requests", "[socks]>=2"));
        assert_eq!(split_dependency("ruamel.yaml"), ("ruamel.yaml", ""));
    }

    #[test]
    fn identical_repeated_dependency_is_written_once() {
        let pkg = LockedPackage::new(
            "foo",
            "1.0",
            "linux-64",
            Origin::Pypi,
            PackageSource::Url("https://files.pythonhosted.org/foo-1.0-py3-none-any.whl".to_owned()),
        )
        .with_dependencies(vec!["idna>=2.5".to_owned(), "idna >=2.5".to_owned()]);
        let env = LockedEnvironment::builder()
            .platform("linux-64")
            .package(pkg)
            .build()
            .unwrap();
        let text = serialize(&env).unwrap();
        assert_eq!(text.matches("idna:").count(), 1, "{text}");
    }

    #[test]
    fn channel_source_cannot_be_written() {
        let pkg = LockedPackage::new(
            "zlib",
            "1.3.1",
            "linux-64",
            Origin::Conda,
            PackageSource::Channel {
                channel: "conda-forge".to_owned(),
                subdir: "linux-64".to_owned(),
            },
        );
        let env = LockedEnvironment::builder()
            .platform("linux-64")
            .package(pkg)
            .build()
            .unwrap();
        let err = serialize(&env).unwrap_err();
        assert!(matches!(err, SerializeError::MissingUrl { .. }));
    }

    #[test]
    fn repeated_dependency_name_is_irreconcilable() {
        let pkg = LockedPackage::new(
            "foo",
            "1.0",
            "linux-64",
            Origin::Conda,
            PackageSource::Url("https://example.com/ch/linux-64/foo-1.0-0.conda".to_owned()),
        )
        .with_dependencies(vec!["python >=3.9".to_owned(), "python <4".to_owned()]);
        let env = LockedEnvironment::builder()
            .platform("linux-64")
            .package(pkg)
            .build()
            .unwrap();
        let err = serialize(&env).unwrap_err();
        assert!(matches!(err, SerializeError::Irreconcilable { .. }));
    }
}
