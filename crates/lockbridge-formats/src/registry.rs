//! Identifier to codec mapping.
//!
//! The process-wide registry is populated once, before the first lookup, and
//! is read-only afterwards. Callers that need a custom format set build their
//! own `FormatRegistry` and install it with [`init_global`] at startup, or
//! pass it to a converter directly.

use crate::{conda_lock_v1, pixi_lock_v6, sniff_version, ParseError, SerializeError};
use lockbridge_schema::LockedEnvironment;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

pub type ParseFn = fn(&str) -> Result<LockedEnvironment, ParseError>;
pub type EnvironmentParseFn = fn(&str, &str) -> Result<LockedEnvironment, ParseError>;
pub type SerializeFn = fn(&LockedEnvironment) -> Result<String, SerializeError>;

/// One registered lockfile format.
#[derive(Debug, Clone, Copy)]
pub struct FormatDescriptor {
    pub identifier: &'static str,
    /// Alternative identifiers accepted by `lookup`.
    pub aliases: &'static [&'static str],
    /// The only on-disk schema version this descriptor reads and writes.
    pub schema_version: u32,
    pub default_filenames: &'static [&'static str],
    pub description: &'static str,
    pub parser: ParseFn,
    /// Loads one named environment, for formats that store several.
    pub environment_parser: Option<EnvironmentParseFn>,
    pub serializer: SerializeFn,
}

impl FormatDescriptor {
    pub fn parse(&self, text: &str) -> Result<LockedEnvironment, ParseError> {
        (self.parser)(text)
    }

    /// Parse only the environment called `name`.
    pub fn parse_environment(
        &self,
        text: &str,
        name: &str,
    ) -> Result<LockedEnvironment, ParseError> {
        match self.environment_parser {
            Some(parser) => parser(text, name),
            None => Err(ParseError::NoNamedEnvironments {
                format: self.identifier,
            }),
        }
    }

    pub fn serialize(&self, env: &LockedEnvironment) -> Result<String, SerializeError> {
        (self.serializer)(env)
    }

    /// True when `id` is the identifier or one of the aliases.
    pub fn matches(&self, id: &str) -> bool {
        self.identifier == id || self.aliases.contains(&id)
    }

    fn names(&self) -> impl Iterator<Item = &'static str> {
        std::iter::once(self.identifier).chain(self.aliases.iter().copied())
    }
}

pub const BUILTIN_FORMATS: &[FormatDescriptor] =
    &[conda_lock_v1::DESCRIPTOR, pixi_lock_v6::DESCRIPTOR];

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown lockfile format '{identifier}' (supported: {supported})")]
    UnknownFormat {
        identifier: String,
        supported: String,
    },
    #[error("lockfile format '{0}' is already registered")]
    DuplicateFormat(String),
    #[error("the global format registry is already initialized")]
    AlreadyInitialized,
}

#[derive(Debug, Default)]
pub struct FormatRegistry {
    formats: Vec<FormatDescriptor>,
}

impl FormatRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in format.
    pub fn with_builtins() -> Self {
        Self {
            formats: BUILTIN_FORMATS.to_vec(),
        }
    }

    /// Add a descriptor. Neither its identifier nor any alias may collide
    /// with a name already registered.
    pub fn register(&mut self, descriptor: FormatDescriptor) -> Result<(), RegistryError> {
        if let Some(taken) = descriptor
            .names()
            .find(|name| self.formats.iter().any(|d| d.matches(name)))
        {
            return Err(RegistryError::DuplicateFormat(taken.to_owned()));
        }
        debug!(
            "registered lockfile format {} (schema version {})",
            descriptor.identifier, descriptor.schema_version
        );
        self.formats.push(descriptor);
        Ok(())
    }

    pub fn lookup(&self, identifier: &str) -> Result<&FormatDescriptor, RegistryError> {
        self.formats
            .iter()
            .find(|d| d.matches(identifier))
            .ok_or_else(|| RegistryError::UnknownFormat {
                identifier: identifier.to_owned(),
                supported: self.list_formats().collect::<Vec<_>>().join(", "),
            })
    }

    /// Registered primary identifiers, in registration order.
    pub fn list_formats(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.formats.iter().map(|d| d.identifier)
    }

    pub fn descriptors(&self) -> &[FormatDescriptor] {
        &self.formats
    }

    /// Pick the format for a document from its file name and declared version.
    ///
    /// A descriptor whose default filename matches and whose schema version
    /// equals the document's wins. Otherwise the version alone decides, but
    /// only when exactly one descriptor claims it.
    pub fn detect(&self, file_name: Option<&Path>, text: &str) -> Option<&FormatDescriptor> {
        let version = sniff_version(text)?;
        let name = file_name
            .and_then(Path::file_name)
            .and_then(|n| n.to_str());

        let by_version = || {
            self.formats
                .iter()
                .filter(move |d| u64::from(d.schema_version) == version)
        };

        if let Some(name) = name {
            if let Some(found) = by_version().find(|d| d.default_filenames.contains(&name)) {
                debug!("detected {} from file name '{name}'", found.identifier);
                return Some(found);
            }
        }

        let mut candidates = by_version();
        let first = candidates.next()?;
        if candidates.next().is_some() {
            debug!("schema version {version} is ambiguous across formats");
            return None;
        }
        debug!("detected {} from schema version {version}", first.identifier);
        Some(first)
    }
}

static GLOBAL: OnceLock<FormatRegistry> = OnceLock::new();

/// The process-wide registry; the built-in formats unless [`init_global`]
/// installed something else first.
pub fn global() -> &'static FormatRegistry {
    GLOBAL.get_or_init(FormatRegistry::with_builtins)
}

/// Install `registry` as the process-wide registry.
///
/// Must run before anything calls [`global`]; afterwards the slot is sealed.
pub fn init_global(registry: FormatRegistry) -> Result<(), RegistryError> {
    let mut slot = Some(registry);
    GLOBAL.get_or_init(|| slot.take().unwrap_or_default());
    if slot.is_some() {
        return Err(RegistryError::AlreadyInitialized);
    }
    Ok(())
}
