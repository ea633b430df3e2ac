use crate::model::{LockedEnvironment, LockedPackage, PackageSource};
use crate::types::{ContentDigest, EnvFingerprint};
use serde::Serialize;

/// Deterministic identity of a whole locked environment.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnvIdentity {
    pub fingerprint: EnvFingerprint,
    pub short_id: String,
}

impl LockedPackage {
    /// Blake3 digest over the fields that make two per-platform entries the
    /// same archive: name, version, build, origin, integrity and source.
    ///
    /// Platform, dependencies and the other descriptive fields are excluded,
    /// so a noarch archive locked for three platforms yields one digest.
    pub fn content_digest(&self) -> ContentDigest {
        let mut hasher = blake3::Hasher::new();

        let origin = self.origin();
        hasher.update(format!("name:{}\n", self.name().normalized(origin)).as_bytes());
        hasher.update(format!("version:{}\n", self.version()).as_bytes());
        if let Some(build) = self.build() {
            hasher.update(format!("build:{build}\n").as_bytes());
        }
        hasher.update(format!("origin:{origin}\n").as_bytes());

        // BTreeMap iteration keeps algorithms in a fixed order.
        for (algorithm, digest) in self.integrity() {
            hasher.update(format!("hash:{algorithm}:{digest}\n").as_bytes());
        }

        match self.source() {
            PackageSource::Url(url) => hasher.update(format!("url:{url}\n").as_bytes()),
            PackageSource::Channel { channel, subdir } => {
                hasher.update(format!("channel:{channel}/{subdir}\n").as_bytes())
            }
        };

        ContentDigest::new(hasher.finalize().to_hex().to_string())
    }
}

impl LockedEnvironment {
    /// Identity over platforms and per-platform package content, in order.
    ///
    /// Metadata does not participate: two documents that lock the same
    /// packages for the same platforms share a fingerprint regardless of
    /// which format they were read from.
    pub fn compute_identity(&self) -> EnvIdentity {
        let mut hasher = blake3::Hasher::new();

        for platform in self.platforms() {
            hasher.update(format!("platform:{platform}\n").as_bytes());
        }
        for pkg in self.packages() {
            hasher.update(
                format!("pkg:{}:{}\n", pkg.platform(), pkg.content_digest()).as_bytes(),
            );
            for dep in pkg.dependencies() {
                hasher.update(format!("dep:{dep}\n").as_bytes());
            }
        }

        let hex = hasher.finalize().to_hex().to_string();
        let short = hex[..12].to_owned();

        EnvIdentity {
            fingerprint: EnvFingerprint::new(hex),
            short_id: short,
        }
    }
}
