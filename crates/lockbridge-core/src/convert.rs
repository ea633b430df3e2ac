use crate::atomic::write_atomic;
use crate::ConvertError;
use lockbridge_formats::{FormatDescriptor, FormatRegistry};
use lockbridge_schema::{LockedEnvironment, Platform, Provenance};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Imports and exports lockfiles through a format registry.
///
/// Every call is independent: a `Converter` holds no state besides the
/// registry reference, so one instance may be shared across threads.
#[derive(Debug, Clone, Copy)]
pub struct Converter<'r> {
    registry: &'r FormatRegistry,
}

impl Converter<'static> {
    /// A converter over the process-wide registry.
    pub fn builtin() -> Self {
        Self::new(lockbridge_formats::global())
    }
}

impl<'r> Converter<'r> {
    pub fn new(registry: &'r FormatRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r FormatRegistry {
        self.registry
    }

    /// Parse `raw` as `format` into a validated environment.
    pub fn import_lockfile(
        &self,
        raw: &str,
        format: &str,
    ) -> Result<LockedEnvironment, ConvertError> {
        let descriptor = self.registry.lookup(format)?;
        let env = descriptor.parse(raw)?;
        debug!(
            "imported {} packages for {} platform(s) as {}",
            env.packages().len(),
            env.platforms().len(),
            descriptor.identifier
        );
        Ok(env)
    }

    /// Parse only the environment called `name` from a multi-environment document.
    pub fn import_environment(
        &self,
        raw: &str,
        format: &str,
        name: &str,
    ) -> Result<LockedEnvironment, ConvertError> {
        let descriptor = self.registry.lookup(format)?;
        let env = descriptor.parse_environment(raw, name)?;
        debug!(
            "imported environment '{name}' with {} packages as {}",
            env.packages().len(),
            descriptor.identifier
        );
        Ok(env)
    }

    /// Serialize `env` as `format`, restricted to `platform_filter` when given.
    pub fn export_lockfile(
        &self,
        env: &LockedEnvironment,
        format: &str,
        platform_filter: Option<&BTreeSet<Platform>>,
    ) -> Result<String, ConvertError> {
        let descriptor = self.registry.lookup(format)?;
        let selected = select_platforms(env, platform_filter)?;
        let text = descriptor.serialize(&selected)?;
        debug!(
            "exported {} packages as {}",
            selected.packages().len(),
            descriptor.identifier
        );
        Ok(text)
    }

    /// Read and parse a lockfile, detecting its format when `format` is `None`.
    pub fn import_file(
        &self,
        path: &Path,
        format: Option<&str>,
    ) -> Result<LockedEnvironment, ConvertError> {
        let raw = std::fs::read_to_string(path)?;
        let descriptor = self.resolve(path, &raw, format)?;
        info!("reading {} as {}", path.display(), descriptor.identifier);
        self.import_lockfile(&raw, descriptor.identifier)
    }

    /// [`Self::import_file`] restricted to the environment called `name`.
    pub fn import_file_environment(
        &self,
        path: &Path,
        format: Option<&str>,
        name: &str,
    ) -> Result<LockedEnvironment, ConvertError> {
        let raw = std::fs::read_to_string(path)?;
        let descriptor = self.resolve(path, &raw, format)?;
        info!(
            "reading environment '{name}' of {} as {}",
            path.display(),
            descriptor.identifier
        );
        self.import_environment(&raw, descriptor.identifier, name)
    }

    /// Export `env` to `path`, replacing any existing file atomically.
    pub fn export_file(
        &self,
        env: &LockedEnvironment,
        path: &Path,
        format: &str,
        platform_filter: Option<&BTreeSet<Platform>>,
    ) -> Result<(), ConvertError> {
        let text = self.export_lockfile(env, format, platform_filter)?;
        write_atomic(path, &text)?;
        info!("wrote {} ({format})", path.display());
        Ok(())
    }

    /// Import `raw` as `from` and export it as `to` in one step.
    pub fn convert(
        &self,
        raw: &str,
        from: &str,
        to: &str,
        platform_filter: Option<&BTreeSet<Platform>>,
    ) -> Result<String, ConvertError> {
        // Fail on an unknown target before doing any parsing work.
        self.registry.lookup(to)?;
        let env = self.import_lockfile(raw, from)?;
        self.export_lockfile(&env, to, platform_filter)
    }

    fn resolve(
        &self,
        path: &Path,
        raw: &str,
        format: Option<&str>,
    ) -> Result<&'r FormatDescriptor, ConvertError> {
        match format {
            Some(id) => Ok(self.registry.lookup(id)?),
            None => self
                .registry
                .detect(Some(path), raw)
                .ok_or_else(|| ConvertError::UndetectedFormat {
                    path: path.to_path_buf(),
                }),
        }
    }
}

fn join_platforms<'a>(platforms: impl IntoIterator<Item = &'a Platform>) -> String {
    platforms
        .into_iter()
        .map(Platform::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Apply the export platform policy.
///
/// An imported lockfile cannot be retargeted: a filter sharing no platform
/// with it is a cross-platform re-export. Otherwise the filter must select
/// at least one locked package.
pub fn select_platforms<'e>(
    env: &'e LockedEnvironment,
    platform_filter: Option<&BTreeSet<Platform>>,
) -> Result<Cow<'e, LockedEnvironment>, ConvertError> {
    let Some(filter) = platform_filter else {
        return Ok(Cow::Borrowed(env));
    };
    let empty_selection = || ConvertError::EmptyPlatformSelection {
        requested: join_platforms(filter),
    };

    let overlap: BTreeSet<&Platform> = env.platforms().intersection(filter).collect();
    if env.provenance() == Provenance::Imported && !filter.is_empty() {
        if overlap.is_empty() {
            return Err(ConvertError::CrossPlatformReexport {
                requested: join_platforms(filter),
                locked: join_platforms(env.platforms()),
            });
        }
        if overlap.len() < filter.len() {
            warn!(
                "ignoring platform(s) not in the imported lockfile: {}",
                join_platforms(filter.difference(env.platforms()))
            );
        }
    }

    if overlap.is_empty() {
        return Err(empty_selection());
    }
    let selected = env
        .filter_platforms(filter)
        .map_err(|_| empty_selection())?;
    if selected.packages().is_empty() {
        return Err(empty_selection());
    }
    Ok(Cow::Owned(selected))
}
