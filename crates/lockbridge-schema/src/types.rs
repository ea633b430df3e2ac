//! Newtype wrappers and closed enums for lockfile identifiers.
//!
//! String newtypes serialize/deserialize as plain strings so they can appear
//! directly inside on-disk lockfile documents.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl PartialEq<String> for $name {
            fn eq(&self, other: &String) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Operating-system/architecture target, spelled as a conda subdir (`linux-64`).
    Platform
);

string_newtype!(
    /// Package name exactly as recorded by the source document or environment.
    PackageName
);

string_newtype!(
    /// Blake3 hex digest identifying one package archive independent of platform.
    ContentDigest
);

string_newtype!(
    /// Full 64-character hex identity of a locked environment's package content.
    EnvFingerprint
);

impl Platform {
    /// The architecture-independent subdir.
    pub const NOARCH: &'static str = "noarch";

    /// Conda subdir of the machine this process runs on, if it has one.
    pub fn host() -> Option<Self> {
        platform_for(std::env::consts::OS, std::env::consts::ARCH).map(Self::new)
    }

    pub fn is_noarch(&self) -> bool {
        self.0 == Self::NOARCH
    }
}

fn platform_for(os: &str, arch: &str) -> Option<&'static str> {
    let subdir = match (os, arch) {
        ("linux", "x86_64") => "linux-64",
        ("linux", "x86") => "linux-32",
        ("linux", "aarch64") => "linux-aarch64",
        ("linux", "powerpc64") => "linux-ppc64le",
        ("linux", "s390x") => "linux-s390x",
        ("macos", "x86_64") => "osx-64",
        ("macos", "aarch64") => "osx-arm64",
        ("windows", "x86_64") => "win-64",
        ("windows", "x86") => "win-32",
        ("windows", "aarch64") => "win-arm64",
        _ => return None,
    };
    Some(subdir)
}

impl PackageName {
    /// Name under the ecosystem's comparison rules.
    ///
    /// Conda names compare case-insensitively. PyPI names follow PEP 503:
    /// lower-cased, with every run of `-`, `_` and `.` collapsed to one `-`.
    pub fn normalized(&self, origin: Origin) -> String {
        match origin {
            Origin::Conda => self.0.to_lowercase(),
            Origin::Pypi => {
                let mut out = String::with_capacity(self.0.len());
                let mut in_separator_run = false;
                for c in self.0.chars() {
                    if matches!(c, '-' | '_' | '.') {
                        if !in_separator_run {
                            out.push('-');
                        }
                        in_separator_run = true;
                    } else {
                        out.extend(c.to_lowercase());
                        in_separator_run = false;
                    }
                }
                out
            }
        }
    }
}

/// Package manager namespace a locked package belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Conda,
    Pypi,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Conda => "conda",
            Origin::Pypi => "pypi",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digest algorithms lockfiles record for package archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
