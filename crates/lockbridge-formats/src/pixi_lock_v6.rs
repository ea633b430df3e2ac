//! pixi / rattler lock, schema version 6 (`pixi.lock`).
//!
//! Packages live once in a flat `packages` table keyed by URL. Environments
//! map each platform to a list of references into that table, so a noarch
//! archive used on three platforms is stored once and referenced three times.
//! Parsing expands references into one canonical entry per platform;
//! serializing re-groups entries by content digest.

use crate::archive::parse_conda_url;
use crate::registry::FormatDescriptor;
use crate::{check_version, ParseError, SerializeError};
use indexmap::IndexMap;
use lockbridge_schema::{
    ArchiveDetails, ContentDigest, EnvironmentMetadata, FindLinks, HashAlgorithm,
    LockedEnvironment, LockedPackage, Origin, PackageSource, Platform, SourceFormat,
    DEFAULT_CATEGORY,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

pub const FORMAT: &str = "pixi-lock-v6";
pub const ALIASES: &[&str] = &["rattler-lock-v6"];
pub const SCHEMA_VERSION: u32 = 6;
pub const PIXI_LOCK_FILE: &str = "pixi.lock";
pub const DEFAULT_FILENAMES: &[&str] = &[PIXI_LOCK_FILE];
pub const DEFAULT_ENVIRONMENT: &str = "default";

pub const DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    identifier: FORMAT,
    aliases: ALIASES,
    schema_version: SCHEMA_VERSION,
    default_filenames: DEFAULT_FILENAMES,
    description: "pixi / rattler lockfile, version 6",
    parser: parse,
    environment_parser: Some(parse_environment),
    serializer: serialize,
};

/// Environment keys with a typed home; anything else is carried verbatim.
const ENVIRONMENT_KEYS: &[&str] = &["channels", "indexes", "find-links", "packages"];

/// Record keys with a typed home; anything else is carried verbatim.
const RECORD_KEYS: &[&str] = &[
    "conda",
    "pypi",
    "name",
    "version",
    "build",
    "sha256",
    "md5",
    "depends",
    "constrains",
    "requires_dist",
    "requires_python",
    "license",
    "license_family",
    "size",
    "timestamp",
    "features",
    "track_features",
    "python_site_packages_path",
];

#[derive(Debug, Serialize, Deserialize)]
struct PixiLockV6 {
    version: u32,
    environments: IndexMap<String, EnvironmentEntry>,
    packages: Vec<PackageRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EnvironmentEntry {
    #[serde(default)]
    channels: Vec<ChannelEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    indexes: Vec<String>,
    #[serde(
        rename = "find-links",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    find_links: Vec<FindLinksEntry>,
    #[serde(default)]
    packages: IndexMap<String, Vec<PackageRef>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChannelEntry {
    url: String,
}

/// `{url: ...}` or `{path: ...}`.
#[derive(Debug, Serialize, Deserialize)]
struct FindLinksEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PackageRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conda: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pypi: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PackageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conda: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pypi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    build: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    md5: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    depends: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    constrains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    requires_dist: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    requires_python: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    license_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    features: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    track_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    python_site_packages_path: Option<String>,
}

/// The same document, read only for the keys the typed structs leave out.
#[derive(Debug, Deserialize)]
struct UntypedKeys {
    #[serde(default)]
    environments: IndexMap<String, serde_yaml::Mapping>,
    #[serde(default)]
    packages: Vec<serde_yaml::Mapping>,
}

/// Exactly one of `conda`/`pypi` must be set on references and records alike.
fn locator<'a>(
    conda: Option<&'a String>,
    pypi: Option<&'a String>,
    path: &str,
) -> Result<(Origin, &'a str), ParseError> {
    match (conda, pypi) {
        (Some(url), None) => Ok((Origin::Conda, url)),
        (None, Some(url)) => Ok((Origin::Pypi, url)),
        (Some(_), Some(_)) => Err(ParseError::InvalidField {
            format: FORMAT,
            path: path.to_owned(),
            reason: "either 'conda' or 'pypi' must be specified, not both".to_owned(),
        }),
        (None, None) => Err(ParseError::InvalidField {
            format: FORMAT,
            path: path.to_owned(),
            reason: "either 'conda' or 'pypi' must be specified".to_owned(),
        }),
    }
}

/// Keys of `mapping` outside `known`, converted for the canonical model.
fn untyped(
    mapping: &serde_yaml::Mapping,
    known: &[&str],
    path: &str,
) -> Result<BTreeMap<String, serde_json::Value>, ParseError> {
    let mut out = BTreeMap::new();
    for (key, value) in mapping {
        let Some(key) = key.as_str() else {
            return Err(ParseError::InvalidField {
                format: FORMAT,
                path: path.to_owned(),
                reason: format!("non-string key {key:?}"),
            });
        };
        if known.contains(&key) {
            continue;
        }
        let value = serde_json::to_value(value).map_err(|e| ParseError::InvalidField {
            format: FORMAT,
            path: format!("{path}.{key}"),
            reason: e.to_string(),
        })?;
        out.insert(key.to_owned(), value);
    }
    Ok(out)
}

/// Parse every environment in the document into one environment.
///
/// Environments that pin different builds of a package for the same
/// platform cannot be merged; load one of them with [`parse_environment`].
pub fn parse(text: &str) -> Result<LockedEnvironment, ParseError> {
    parse_selected(text, None)
}

/// Parse a single named environment, as a loader creating one environment would.
pub fn parse_environment(text: &str, name: &str) -> Result<LockedEnvironment, ParseError> {
    parse_selected(text, Some(name))
}

fn parse_selected(text: &str, only: Option<&str>) -> Result<LockedEnvironment, ParseError> {
    check_version(FORMAT, text, SCHEMA_VERSION)?;
    let yaml_error = |source: serde_yaml::Error| ParseError::Yaml {
        format: FORMAT,
        source,
    };
    let doc: PixiLockV6 = serde_yaml::from_str(text).map_err(yaml_error)?;
    let raw: UntypedKeys = serde_yaml::from_str(text).map_err(yaml_error)?;

    if !doc.environments.contains_key(DEFAULT_ENVIRONMENT) {
        return Err(ParseError::MissingField {
            format: FORMAT,
            path: format!("environments.{DEFAULT_ENVIRONMENT}"),
        });
    }
    if let Some(name) = only {
        if !doc.environments.contains_key(name) {
            return Err(ParseError::UnknownEnvironment {
                format: FORMAT,
                name: name.to_owned(),
                available: doc
                    .environments
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
    }

    let table = record_table(&doc.packages)?;
    let mut templates: Vec<Option<LockedPackage>> = vec![None; doc.packages.len()];
    let mut materialized: HashSet<(usize, Platform)> = HashSet::new();
    let mut platforms: BTreeSet<Platform> = BTreeSet::new();
    let mut packages: Vec<LockedPackage> = Vec::new();
    let mut metadata = EnvironmentMetadata {
        source_format: Some(SourceFormat {
            identifier: FORMAT.to_owned(),
            schema_version: SCHEMA_VERSION,
        }),
        ..EnvironmentMetadata::default()
    };

    for (env_name, environment) in &doc.environments {
        if only.is_some_and(|name| name != env_name.as_str()) {
            continue;
        }
        merge_settings(
            &mut metadata,
            env_name,
            environment,
            raw.environments.get(env_name),
        )?;

        for (platform_name, refs) in &environment.packages {
            let platform = Platform::new(platform_name.as_str());
            platforms.insert(platform.clone());

            for (position, reference) in refs.iter().enumerate() {
                let path = format!("environments.{env_name}.packages.{platform_name}[{position}]");
                let (origin, url) =
                    locator(reference.conda.as_ref(), reference.pypi.as_ref(), &path)?;
                let Some(&index) = table.get(&(origin, url)) else {
                    return Err(ParseError::DanglingReference {
                        format: FORMAT,
                        path,
                        url: url.to_owned(),
                    });
                };

                // Shared records expand once per platform, however many
                // environments reference them there.
                if !materialized.insert((index, platform.clone())) {
                    continue;
                }
                let template = match &templates[index] {
                    Some(template) => template.clone(),
                    None => {
                        let other = match raw.packages.get(index) {
                            Some(mapping) => {
                                untyped(mapping, RECORD_KEYS, &format!("packages[{index}]"))?
                            }
                            None => BTreeMap::new(),
                        };
                        let converted = record_to_package(
                            index,
                            &doc.packages[index],
                            other,
                            origin,
                            url,
                            &platform,
                        )?;
                        templates[index] = Some(converted.clone());
                        converted
                    }
                };
                packages.push(template.with_platform(platform.clone()));
            }
        }
    }

    let unreferenced = templates.iter().filter(|t| t.is_none()).count();
    if unreferenced > 0 {
        debug!("{FORMAT}: {unreferenced} table records are not referenced by any selected environment");
    }
    debug!(
        "{FORMAT}: expanded {} table records into {} entries across {} platforms",
        doc.packages.len() - unreferenced,
        packages.len(),
        platforms.len()
    );

    LockedEnvironment::new(platforms, packages, metadata).map_err(|source| {
        ParseError::Validation {
            format: FORMAT,
            source,
        }
    })
}

/// Index the record table by `(origin, url)`, rejecting duplicate records.
fn record_table(
    records: &[PackageRecord],
) -> Result<HashMap<(Origin, &str), usize>, ParseError> {
    let mut table = HashMap::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let path = format!("packages[{index}]");
        let key = locator(record.conda.as_ref(), record.pypi.as_ref(), &path)?;
        if table.insert(key, index).is_some() {
            return Err(ParseError::InvalidField {
                format: FORMAT,
                path,
                reason: format!("duplicate record for '{}'", key.1),
            });
        }
    }
    Ok(table)
}

/// Fold one environment's channels, indexes and solver settings into `metadata`.
///
/// Lists keep first-seen order without repeats; for a solver setting present
/// in several environments the first one wins.
fn merge_settings(
    metadata: &mut EnvironmentMetadata,
    env_name: &str,
    environment: &EnvironmentEntry,
    raw: Option<&serde_yaml::Mapping>,
) -> Result<(), ParseError> {
    for channel in &environment.channels {
        push_unique(&mut metadata.channels, &channel.url);
    }
    for index_url in &environment.indexes {
        push_unique(&mut metadata.pypi_indexes, index_url);
    }
    for (position, entry) in environment.find_links.iter().enumerate() {
        let location = find_links_location(entry, env_name, position)?;
        if !metadata.find_links.contains(&location) {
            metadata.find_links.push(location);
        }
    }
    if let Some(mapping) = raw {
        let path = format!("environments.{env_name}");
        for (key, value) in untyped(mapping, ENVIRONMENT_KEYS, &path)? {
            metadata.solve_options.entry(key).or_insert(value);
        }
    }
    Ok(())
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_owned());
    }
}

fn find_links_location(
    entry: &FindLinksEntry,
    env_name: &str,
    position: usize,
) -> Result<FindLinks, ParseError> {
    match (&entry.url, &entry.path) {
        (Some(url), None) => Ok(FindLinks::Url(url.clone())),
        (None, Some(path)) => Ok(FindLinks::Path(path.clone())),
        _ => Err(ParseError::InvalidField {
            format: FORMAT,
            path: format!("environments.{env_name}.find-links[{position}]"),
            reason: "exactly one of 'url' or 'path' must be specified".to_owned(),
        }),
    }
}

fn record_to_package(
    index: usize,
    record: &PackageRecord,
    other: BTreeMap<String, serde_json::Value>,
    origin: Origin,
    url: &str,
    platform: &Platform,
) -> Result<LockedPackage, ParseError> {
    let missing = |field: &str| ParseError::MissingField {
        format: FORMAT,
        path: format!("packages[{index}].{field}"),
    };

    let (name, version, build, dependencies) = match origin {
        Origin::Conda => {
            let archive = parse_conda_url(url);
            let name = record
                .name
                .clone()
                .or_else(|| archive.as_ref().map(|a| a.name.to_owned()))
                .ok_or_else(|| missing("name"))?;
            let version = record
                .version
                .clone()
                .or_else(|| archive.as_ref().map(|a| a.version.to_owned()))
                .ok_or_else(|| missing("version"))?;
            let build = record
                .build
                .clone()
                .or_else(|| archive.as_ref().map(|a| a.build.to_owned()));
            (name, version, build, record.depends.clone())
        }
        Origin::Pypi => {
            let name = record.name.clone().ok_or_else(|| missing("name"))?;
            let version = record.version.clone().ok_or_else(|| missing("version"))?;
            (name, version, None, record.requires_dist.clone())
        }
    };

    let details = ArchiveDetails {
        license_family: record.license_family.clone(),
        timestamp: record.timestamp,
        features: record.features.clone(),
        track_features: record.track_features.clone(),
        python_site_packages_path: record.python_site_packages_path.clone(),
        requires_python: record.requires_python.clone(),
        other,
    };

    let mut pkg = LockedPackage::new(
        name,
        version,
        platform.clone(),
        origin,
        PackageSource::Url(url.to_owned()),
    )
    .with_build(build)
    .with_dependencies(dependencies)
    .with_constrains(record.constrains.clone())
    .with_license(record.license.clone())
    .with_size(record.size)
    .with_details(details);

    if let Some(md5) = &record.md5 {
        pkg = pkg.with_hash(HashAlgorithm::Md5, md5.clone());
    }
    if let Some(sha256) = &record.sha256 {
        pkg = pkg.with_hash(HashAlgorithm::Sha256, sha256.clone());
    }
    Ok(pkg)
}

pub fn serialize(env: &LockedEnvironment) -> Result<String, SerializeError> {
    let mut records: Vec<PackageRecord> = Vec::new();
    let mut untyped_records: Vec<&BTreeMap<String, serde_json::Value>> = Vec::new();
    // content digest -> (table index, first entry seen with that content)
    let mut by_digest: HashMap<ContentDigest, (usize, &LockedPackage)> = HashMap::new();
    let mut by_url: HashMap<(Origin, &str), ContentDigest> = HashMap::new();
    let mut platform_refs: BTreeMap<String, Vec<PackageRef>> = env
        .platforms()
        .iter()
        .map(|p| (p.to_string(), Vec::new()))
        .collect();

    for pkg in env.packages() {
        let Some(url) = pkg.source().url() else {
            return Err(SerializeError::MissingUrl {
                format: FORMAT,
                package: pkg.display_spec(),
                platform: pkg.platform().to_string(),
            });
        };
        let digest = pkg.content_digest();

        if let Some(existing) = by_url.get(&(pkg.origin(), url)) {
            if *existing != digest {
                return Err(SerializeError::Irreconcilable {
                    format: FORMAT,
                    package: pkg.display_spec(),
                    reason: format!("'{url}' is locked with differing content on different platforms"),
                });
            }
        }

        if pkg.category() != DEFAULT_CATEGORY || pkg.is_optional() {
            warn!(
                "{FORMAT}: {} for {} is in category '{}'{}; pixi lockfiles record neither, writing it as a regular package",
                pkg.display_spec(),
                pkg.platform(),
                pkg.category(),
                if pkg.is_optional() { " (optional)" } else { "" }
            );
        }

        match by_digest.get(&digest) {
            Some((_, first)) => ensure_compatible(first, pkg)?,
            None => {
                by_digest.insert(digest.clone(), (records.len(), pkg));
                by_url.insert((pkg.origin(), url), digest);
                records.push(package_to_record(pkg, url));
                untyped_records.push(&pkg.details().other);
            }
        }

        let reference = match pkg.origin() {
            Origin::Conda => PackageRef {
                conda: Some(url.to_owned()),
                pypi: None,
            },
            Origin::Pypi => PackageRef {
                conda: None,
                pypi: Some(url.to_owned()),
            },
        };
        platform_refs
            .entry(pkg.platform().to_string())
            .or_default()
            .push(reference);
    }

    let meta = env.metadata();
    let default_env = EnvironmentEntry {
        channels: meta
            .channels
            .iter()
            .map(|url| ChannelEntry { url: url.clone() })
            .collect(),
        indexes: meta.pypi_indexes.clone(),
        find_links: meta
            .find_links
            .iter()
            .map(|location| match location {
                FindLinks::Url(url) => FindLinksEntry {
                    url: Some(url.clone()),
                    path: None,
                },
                FindLinks::Path(path) => FindLinksEntry {
                    url: None,
                    path: Some(path.clone()),
                },
            })
            .collect(),
        packages: platform_refs.into_iter().collect(),
    };

    let mut environments = IndexMap::new();
    environments.insert(DEFAULT_ENVIRONMENT.to_owned(), default_env);

    debug!(
        "{FORMAT}: grouped {} entries into {} table records",
        env.packages().len(),
        records.len()
    );

    let doc = PixiLockV6 {
        version: SCHEMA_VERSION,
        environments,
        packages: records,
    };
    let yaml_error = |source: serde_yaml::Error| SerializeError::Yaml {
        format: FORMAT,
        source,
    };
    let mut value = serde_yaml::to_value(&doc).map_err(yaml_error)?;
    if let Some(default) = value
        .get_mut("environments")
        .and_then(|e| e.get_mut(DEFAULT_ENVIRONMENT))
        .and_then(serde_yaml::Value::as_mapping_mut)
    {
        append_untyped(default, &meta.solve_options)?;
    }
    if let Some(table) = value
        .get_mut("packages")
        .and_then(serde_yaml::Value::as_sequence_mut)
    {
        for (record, other) in table.iter_mut().zip(untyped_records) {
            if let Some(record) = record.as_mapping_mut() {
                append_untyped(record, other)?;
            }
        }
    }
    serde_yaml::to_string(&value).map_err(yaml_error)
}

/// Write carried-through keys after the typed ones.
fn append_untyped(
    mapping: &mut serde_yaml::Mapping,
    values: &BTreeMap<String, serde_json::Value>,
) -> Result<(), SerializeError> {
    for (key, value) in values {
        let value = serde_yaml::to_value(value).map_err(|source| SerializeError::Yaml {
            format: FORMAT,
            source,
        })?;
        mapping.insert(key.as_str().into(), value);
    }
    Ok(())
}

/// Entries sharing one table record must agree on everything the record stores.
fn ensure_compatible(first: &LockedPackage, other: &LockedPackage) -> Result<(), SerializeError> {
    let conflict = if first.dependencies() != other.dependencies() {
        Some("dependencies")
    } else if first.constrains() != other.constrains() {
        Some("constrains")
    } else if first.license() != other.license() {
        Some("license")
    } else if first.size() != other.size() {
        Some("size")
    } else if first.details() != other.details() {
        Some("archive details")
    } else {
        None
    };
    match conflict {
        Some(field) => Err(SerializeError::Irreconcilable {
            format: FORMAT,
            package: other.display_spec(),
            reason: format!(
                "identical archive has different {field} on '{}' and '{}'",
                first.platform(),
                other.platform()
            ),
        }),
        None => Ok(()),
    }
}

fn package_to_record(pkg: &LockedPackage, url: &str) -> PackageRecord {
    let details = pkg.details();
    let mut record = PackageRecord {
        sha256: pkg.hash(HashAlgorithm::Sha256).map(str::to_owned),
        md5: pkg.hash(HashAlgorithm::Md5).map(str::to_owned),
        constrains: pkg.constrains().to_vec(),
        license: pkg.license().map(str::to_owned),
        license_family: details.license_family.clone(),
        size: pkg.size(),
        timestamp: details.timestamp,
        features: details.features.clone(),
        track_features: details.track_features.clone(),
        python_site_packages_path: details.python_site_packages_path.clone(),
        requires_python: details.requires_python.clone(),
        ..PackageRecord::default()
    };

    match pkg.origin() {
        Origin::Conda => {
            record.conda = Some(url.to_owned());
            record.depends = pkg.dependencies().to_vec();
            // Name, version and build are written only when the URL does not carry them.
            let archive = parse_conda_url(url);
            let derivable = archive.as_ref().is_some_and(|a| {
                a.name == pkg.name().as_str()
                    && a.version == pkg.version()
                    && Some(a.build) == pkg.build()
            });
            if !derivable {
                record.name = Some(pkg.name().to_string());
                record.version = Some(pkg.version().to_owned());
                record.build = pkg.build().map(str::to_owned);
            }
        }
        Origin::Pypi => {
            record.pypi = Some(url.to_owned());
            record.name = Some(pkg.name().to_string());
            record.version = Some(pkg.version().to_owned());
            record.requires_dist = pkg.dependencies().to_vec();
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHARED: &str = r"version: 6
environments:
  default:
    channels:
    - url: https://conda.anaconda.org/conda-forge/
    packages:
      linux-64:
      - conda: https://conda.anaconda.org/conda-forge/noarch/boltons-24.0.0-pyhd8ed1ab_0.conda
      win-64:
      - conda: https://conda.anaconda.org/conda-forge/noarch/boltons-24.0.0-pyhd8ed1ab_0.conda
packages:
- conda: https://conda.anaconda.org/conda-forge/noarch/boltons-24.0.0-pyhd8ed1ab_0.conda
  sha256: e44d07932306392372411ab1261670a552f96077f925af00c1559a18a73a1bdc
  md5: 61de176bd62041f9cd5bd4fcd09eb0ff
  depends:
  - python >=3.7
  license: BSD-3-Clause
  size: 297896
";

    #[test]
    fn shared_record_expands_per_platform() {
        let env = parse(SHARED).unwrap();
        assert_eq!(env.packages().len(), 2);
        let platforms: Vec<&str> = env.packages().iter().map(|p| p.platform().as_str()).collect();
        assert_eq!(platforms, vec!["linux-64", "win-64"]);
        for pkg in env.packages() {
            assert_eq!(pkg.name(), "boltons");
            assert_eq!(pkg.version(), "24.0.0");
            assert_eq!(pkg.build(), Some("pyhd8ed1ab_0"));
            assert_eq!(pkg.dependencies(), ["python >=3.7".to_owned()]);
            assert_eq!(pkg.size(), Some(297_896));
        }
    }

    #[test]
    fn regroups_into_single_record() {
        let env = parse(SHARED).unwrap();
        let text = serialize(&env).unwrap();
        let doc: PixiLockV6 = serde_yaml::from_str(&text).unwrap();
        assert_eq!(doc.packages.len(), 1);
        let default = &doc.environments[DEFAULT_ENVIRONMENT];
        assert_eq!(default.packages["linux-64"].len(), 1);
        assert_eq!(default.packages["win-64"].len(), 1);
        // Derivable identity fields are not repeated in the record.
        assert!(doc.packages[0].name.is_none());
    }

    #[test]
    fn roundtrip_is_stable() {
        let env = parse(SHARED).unwrap();
        let reparsed = parse(&serialize(&env).unwrap()).unwrap();
        assert_eq!(env, reparsed);
    }

    #[test]
    fn rejects_other_versions() {
        let err = parse(&SHARED.replacen("version: 6", "version: 5", 1)).unwrap_err();
        assert!(err.is_unsupported_version());
    }

    #[test]
    fn requires_default_environment() {
        let err = parse(&SHARED.replacen("  default:", "  dev:", 1)).unwrap_err();
        assert!(matches!(err, ParseError::MissingField { ref path, .. } if path == "environments.default"));
    }

    #[test]
    fn dangling_reference_is_reported() {
        let doc = SHARED.replacen(
            "      win-64:\n      - conda: https://conda.anaconda.org/conda-forge/noarch/boltons-24.0.0-pyhd8ed1ab_0.conda",
            "      win-64:\n      - conda: https://conda.anaconda.org/conda-forge/noarch/missing-1.0-0.conda",
            1,
        );
        let err = parse(&doc).unwrap_err();
        assert!(matches!(err, ParseError::DanglingReference { .. }), "got {err}");
    }

    #[test]
    fn reference_with_both_managers_is_invalid() {
        let doc = SHARED.replacen(
            "      linux-64:\n      - conda: https://conda.anaconda.org/conda-forge/noarch/boltons-24.0.0-pyhd8ed1ab_0.conda",
            "      linux-64:\n      - conda: https://conda.anaconda.org/conda-forge/noarch/boltons-24.0.0-pyhd8ed1ab_0.conda\n        pypi: https://files.pythonhosted.org/boltons-24.0.0-py3-none-any.whl",
            1,
        );
        let err = parse(&doc).unwrap_err();
        assert!(matches!(err, ParseError::InvalidField { .. }), "got {err}");
    }

    #[test]
    fn pypi_record_requires_name() {
        let doc = r"version: 6
environments:
  default:
    channels: []
    packages:
      linux-64:
      - pypi: https://files.pythonhosted.org/requests-2.31.0-py3-none-any.whl
packages:
- pypi: https://files.pythonhosted.org/requests-2.31.0-py3-none-any.whl
  version: 2.31.0
";
        let err = parse(doc).unwrap_err();
        assert!(matches!(err, ParseError::MissingField { ref path, .. } if path == "packages[0].name"));
    }

    #[test]
    fn shared_record_across_environments_materializes_once() {
        let doc = r"version: 6
environments:
  default:
    channels: []
    packages:
      linux-64:
      - conda: https://conda.anaconda.org/conda-forge/linux-64/zlib-1.3.1-h4ab18f5_1.conda
  test:
    channels: []
    packages:
      linux-64:
      - conda: https://conda.anaconda.org/conda-forge/linux-64/zlib-1.3.1-h4ab18f5_1.conda
packages:
- conda: https://conda.anaconda.org/conda-forge/linux-64/zlib-1.3.1-h4ab18f5_1.conda
";
        let env = parse(doc).unwrap();
        assert_eq!(env.packages().len(), 1);
    }

    #[test]
    fn selects_named_environment() {
        let doc = r"version: 6
environments:
  default:
    channels: []
    packages:
      linux-64:
      - conda: https://conda.anaconda.org/conda-forge/linux-64/zlib-1.3.1-h4ab18f5_1.conda
  py311:
    channels: []
    packages:
      osx-arm64:
      - conda: https://conda.anaconda.org/conda-forge/osx-arm64/zlib-1.3.1-hfb2fe0b_1.conda
packages:
- conda: https://conda.anaconda.org/conda-forge/linux-64/zlib-1.3.1-h4ab18f5_1.conda
- conda: https://conda.anaconda.org/conda-forge/osx-arm64/zlib-1.3.1-hfb2fe0b_1.conda
";
        let env = parse_environment(doc, "py311").unwrap();
        assert_eq!(env.platforms().len(), 1);
        assert_eq!(env.packages()[0].build(), Some("hfb2fe0b_1"));

        let err = parse_environment(doc, "nope").unwrap_err();
        assert!(matches!(err, ParseError::UnknownEnvironment { .. }));
    }

    #[test]
    fn differing_dependencies_are_irreconcilable() {
        let env = parse(SHARED).unwrap();
        let mut packages = env.packages().to_vec();
        packages[1] = packages[1]
            .clone()
            .with_dependencies(vec!["python >=3.8".to_owned()]);
        let altered = LockedEnvironment::new(
            env.platforms().iter().cloned(),
            packages,
            env.metadata().clone(),
        )
        .unwrap();
        let err = serialize(&altered).unwrap_err();
        match err {
            SerializeError::Irreconcilable { reason, .. } => {
                assert!(reason.contains("dependencies"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn same_url_with_different_hash_is_irreconcilable() {
        let env = parse(SHARED).unwrap();
        let mut packages = env.packages().to_vec();
        packages[1] = packages[1]
            .clone()
            .with_hash(HashAlgorithm::Sha256, "00".repeat(32));
        let altered = LockedEnvironment::new(
            env.platforms().iter().cloned(),
            packages,
            env.metadata().clone(),
        )
        .unwrap();
        assert!(matches!(
            serialize(&altered).unwrap_err(),
            SerializeError::Irreconcilable { .. }
        ));
    }

    #[test]
    fn declared_platform_without_packages_is_kept() {
        let env = LockedEnvironment::builder()
            .platform("linux-64")
            .platform("osx-arm64")
            .package(parse(SHARED).unwrap().packages()[0].clone())
            .build()
            .unwrap();
        let text = serialize(&env).unwrap();
        assert!(text.contains("osx-arm64: []"), "{text}");
    }

    const MULTI_ENV: &str = r"version: 6
environments:
  default:
    channels:
    - url: https://conda.anaconda.org/conda-forge/
    packages:
      linux-64:
      - conda: https://conda.anaconda.org/conda-forge/linux-64/zlib-1.3.1-h4ab18f5_1.conda
  legacy:
    channels:
    - url: https://conda.anaconda.org/conda-forge/
    packages:
      linux-64:
      - conda: https://conda.anaconda.org/conda-forge/linux-64/zlib-1.2.13-hd590300_5.conda
packages:
- conda: https://conda.anaconda.org/conda-forge/linux-64/zlib-1.2.13-hd590300_5.conda
- conda: https://conda.anaconda.org/conda-forge/linux-64/zlib-1.3.1-h4ab18f5_1.conda
";

    #[test]
    fn conflicting_environments_cannot_be_merged() {
        let err = parse(MULTI_ENV).unwrap_err();
        assert!(matches!(err, ParseError::Validation { .. }), "got {err}");
    }

    #[test]
    fn conflicting_environments_load_one_at_a_time() {
        let default = parse_environment(MULTI_ENV, "default").unwrap();
        assert_eq!(default.packages().len(), 1);
        assert_eq!(default.packages()[0].version(), "1.3.1");

        let legacy = parse_environment(MULTI_ENV, "legacy").unwrap();
        assert_eq!(legacy.packages()[0].version(), "1.2.13");
        assert_eq!(legacy.packages()[0].build(), Some("hd590300_5"));
    }

    const DETAILED: &str = r"version: 6
environments:
  default:
    channels:
    - url: https://conda.anaconda.org/conda-forge/
    indexes:
    - https://pypi.org/simple
    find-links:
    - url: https://download.pytorch.org/whl/torch_stable.html
    - path: ./wheels
    options:
      pypi-prerelease-mode: if-necessary-or-explicit
    packages:
      linux-64:
      - conda: https://conda.anaconda.org/conda-forge/linux-64/libblas-3.9.0-20_linux64_openblas.conda
      - pypi: https://files.pythonhosted.org/packages/requests-2.32.3-py3-none-any.whl
packages:
- conda: https://conda.anaconda.org/conda-forge/linux-64/libblas-3.9.0-20_linux64_openblas.conda
  sha256: 7df29f48ea4ba4e5c11f4f0d0ba3d9ad6a1d3b5e1c6a8f3e2b5f1c2d3e4f5a6b
  depends:
  - libopenblas >=0.3.25,<1.0a0
  license: BSD-3-Clause
  license_family: BSD
  size: 14433
  timestamp: 1700568365289
  track_features:
  - blas_openblas
  features: blas_openblas
- pypi: https://files.pythonhosted.org/packages/requests-2.32.3-py3-none-any.whl
  name: requests
  version: 2.32.3
  sha256: 70761cfe03c773ceb22aa2f671b4757976145175cdfca038c02654d061d6dcc6
  requires_dist:
  - charset-normalizer<4,>=2
  - pysocks!=1.5.7,>=1.5.6 ; extra == 'socks'
  requires_python: '>=3.8'
  editable: false
";

    #[test]
    fn archive_details_are_carried_into_the_model() {
        let env = parse(DETAILED).unwrap();
        let blas = env.packages()[0].details();
        assert_eq!(blas.license_family.as_deref(), Some("BSD"));
        assert_eq!(blas.timestamp, Some(1_700_568_365_289));
        assert_eq!(blas.track_features, vec!["blas_openblas".to_owned()]);
        assert_eq!(blas.features.as_deref(), Some("blas_openblas"));

        let requests = env.packages()[1].details();
        assert_eq!(requests.requires_python.as_deref(), Some(">=3.8"));
        assert_eq!(requests.other.get("editable"), Some(&serde_json::Value::Bool(false)));

        let meta = env.metadata();
        assert_eq!(
            meta.find_links,
            vec![
                FindLinks::Url("https://download.pytorch.org/whl/torch_stable.html".to_owned()),
                FindLinks::Path("./wheels".to_owned()),
            ]
        );
        assert!(meta.solve_options.contains_key("options"));
    }

    #[test]
    fn same_format_round_trip_keeps_every_field() {
        let env = parse(DETAILED).unwrap();
        let text = serialize(&env).unwrap();
        for needle in [
            "license_family: BSD",
            "timestamp: 1700568365289",
            "- blas_openblas",
            "features: blas_openblas",
            "requires_python:",
            "editable: false",
            "find-links:",
            "path: ./wheels",
            "pypi-prerelease-mode: if-necessary-or-explicit",
        ] {
            assert!(text.contains(needle), "missing '{needle}' in:\n{text}");
        }
        assert_eq!(parse(&text).unwrap(), env);
    }

    #[test]
    fn find_links_entry_needs_exactly_one_location() {
        let doc = DETAILED.replacen("    - path: ./wheels\n", "    - {}\n", 1);
        let err = parse(&doc).unwrap_err();
        assert!(
            matches!(err, ParseError::InvalidField { ref path, .. } if path == "environments.default.find-links[1]"),
            "got {err}"
        );
    }

    #[test]
    fn dev_category_is_written_as_a_regular_package() {
        let pkg = parse(SHARED).unwrap().packages()[0]
            .clone()
            .with_category("dev", true);
        let env = LockedEnvironment::builder()
            .platform("linux-64")
            .package(pkg)
            .build()
            .unwrap();
        let text = serialize(&env).unwrap();
        assert!(!text.contains("dev"), "{text}");
        assert_eq!(parse(&text).unwrap().packages()[0].category(), DEFAULT_CATEGORY);
    }
}
