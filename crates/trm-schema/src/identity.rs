use crate::manifest::{Manifest, ManifestError};
use crate::normalize::normalize_name;
use crate::types::Integrity;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use url::Url;

/// Where a package lives: the public registry, a custom registry endpoint,
/// or a local (file-based) connector.
///
/// Two references are equal only if they are the same kind of connector and,
/// for custom registries, the same endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegistryRef {
    #[default]
    Public,
    Local,
    Custom(String),
}

impl RegistryRef {
    pub const PUBLIC: &'static str = "public";
    pub const LOCAL: &'static str = "local";

    /// Parse an endpoint string. URL endpoints are canonicalized (lower-case
    /// scheme and host, default port dropped, no trailing slash) so the same
    /// registry always compares equal; anything else is kept as written.
    pub fn parse(endpoint: &str) -> Self {
        let trimmed = endpoint.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(Self::PUBLIC) {
            return Self::Public;
        }
        if trimmed.eq_ignore_ascii_case(Self::LOCAL) {
            return Self::Local;
        }
        let canonical = match Url::parse(trimmed) {
            Ok(url) if url.has_host() => url.as_str().trim_end_matches('/').to_owned(),
            _ => trimmed.trim_end_matches('/').to_owned(),
        };
        Self::Custom(canonical)
    }

    pub fn endpoint(&self) -> &str {
        match self {
            Self::Public => Self::PUBLIC,
            Self::Local => Self::LOCAL,
            Self::Custom(url) => url,
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, Self::Public)
    }
}

impl fmt::Display for RegistryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}

impl Serialize for RegistryRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.endpoint())
    }
}

impl<'de> Deserialize<'de> for RegistryRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// The dedup and lookup key for packages: normalized name plus registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub name: String,
    pub registry: RegistryRef,
}

impl PackageIdentity {
    /// Build an identity, normalizing the name with the manifest rules.
    pub fn new(name: &str, registry: RegistryRef) -> Result<Self, ManifestError> {
        Ok(Self {
            name: normalize_name(name)?,
            registry,
        })
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.registry.is_public() {
            f.write_str(&self.name)
        } else {
            write!(f, "{} ({})", self.name, self.registry)
        }
    }
}

/// A package as seen on a system or in a registry: its manifest, where it
/// came from, and, when known, the integrity of its artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub manifest: Manifest,
    pub registry: RegistryRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<Integrity>,
}

impl Package {
    pub fn new(manifest: Manifest, registry: RegistryRef) -> Self {
        Self {
            manifest,
            registry,
            integrity: None,
        }
    }

    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity {
            name: self.manifest.name.clone(),
            registry: self.registry.clone(),
        }
    }

    /// Compare by `(name, version?, registry)`.
    pub fn compare(&self, other: &Package, include_version: bool) -> bool {
        compare(self, other, include_version)
    }
}

/// Compare two packages by name and registry and, optionally, version.
pub fn compare(a: &Package, b: &Package, include_version: bool) -> bool {
    a.manifest.name == b.manifest.name
        && a.registry == b.registry
        && (!include_version || a.manifest.version == b.manifest.version)
}
