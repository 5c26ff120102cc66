use crate::identity::{PackageIdentity, RegistryRef};
use crate::range::{clean_version, VersionRange};
use crate::types::Integrity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lock file parse error: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("lock file parse error: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("lock file serialize error: {0}")]
    SerializeToml(#[from] toml::ser::Error),
    #[error("unsupported lockfileVersion {found}, this build reads up to {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("package '{name}' from '{registry}' appears more than once in the lock file")]
    Duplicate { name: String, registry: String },
}

/// On-disk encoding of a lock file; the caller decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockFormat {
    #[default]
    Json,
    Toml,
}

impl LockFormat {
    /// Pick the format from a file extension, defaulting to JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

/// A dependency pinned to the version and integrity installed on the
/// system the lock was taken from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
    pub name: String,
    pub version: String,
    pub registry: RegistryRef,
    pub integrity: Integrity,
}

impl LockedPackage {
    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity {
            name: self.name.clone(),
            registry: self.registry.clone(),
        }
    }
}

/// The lock file pins every transitive dependency of a root package.
///
/// Each `(name, registry)` pair appears at most once; the first entry
/// recorded wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lockfile {
    pub lockfile_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub packages: Vec<LockedPackage>,
}

impl Default for Lockfile {
    fn default() -> Self {
        Self {
            lockfile_version: Self::VERSION,
            name: None,
            version: None,
            packages: Vec::new(),
        }
    }
}

impl Lockfile {
    pub const VERSION: u32 = 1;

    /// Empty lock file for a root package.
    pub fn for_root(name: &str, version: &str) -> Self {
        Self {
            name: Some(name.to_owned()),
            version: Some(version.to_owned()),
            ..Self::default()
        }
    }

    /// Record a package. Returns `false` (and changes nothing) when the
    /// identity is already present.
    pub fn insert(&mut self, package: LockedPackage) -> bool {
        if self.get(&package.identity()).is_some() {
            return false;
        }
        self.packages.push(package);
        true
    }

    pub fn get(&self, identity: &PackageIdentity) -> Option<&LockedPackage> {
        self.packages
            .iter()
            .find(|p| p.name == identity.name && p.registry == identity.registry)
    }

    /// The lock entry for `identity` if its pinned version satisfies `range`.
    pub fn entry_for(
        &self,
        identity: &PackageIdentity,
        range: &VersionRange,
    ) -> Option<&LockedPackage> {
        self.get(identity).filter(|locked| {
            clean_version(&locked.version).is_some_and(|version| range.matches(&version))
        })
    }

    pub fn verify(&self) -> Result<(), LockError> {
        if self.lockfile_version > Self::VERSION {
            return Err(LockError::UnsupportedVersion {
                found: self.lockfile_version,
                supported: Self::VERSION,
            });
        }
        let mut seen = HashSet::new();
        for package in &self.packages {
            if !seen.insert(package.identity()) {
                return Err(LockError::Duplicate {
                    name: package.name.clone(),
                    registry: package.registry.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn to_string(&self, format: LockFormat) -> Result<String, LockError> {
        Ok(match format {
            LockFormat::Json => serde_json::to_string_pretty(self)?,
            LockFormat::Toml => toml::to_string_pretty(self)?,
        })
    }

    pub fn from_str(content: &str, format: LockFormat) -> Result<Self, LockError> {
        let lock: Self = match format {
            LockFormat::Json => serde_json::from_str(content)?,
            LockFormat::Toml => toml::from_str(content)?,
        };
        lock.verify()?;
        Ok(lock)
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>, format: LockFormat) -> Result<(), LockError> {
        let path = path.as_ref();
        let content = self.to_string(format)?;
        let dir = path.parent().unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| LockError::Io(e.error))?;
        // Fsync parent directory to ensure rename durability on power loss.
        if let Ok(f) = fs::File::open(dir) {
            let _ = f.sync_all();
        }
        Ok(())
    }

    pub fn read_from_file(path: impl AsRef<Path>, format: LockFormat) -> Result<Self, LockError> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content, format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locked(name: &str, version: &str, registry: RegistryRef) -> LockedPackage {
        LockedPackage {
            name: name.to_owned(),
            version: version.to_owned(),
            registry,
            integrity: Integrity::new(format!("blake3-{name}{version}")),
        }
    }

    fn sample() -> Lockfile {
        let mut lock = Lockfile::for_root("app", "1.0.0");
        lock.insert(locked("core", "1.2.0", RegistryRef::Public));
        lock.insert(locked(
            "core",
            "0.9.0",
            RegistryRef::parse("https://private.example"),
        ));
        lock
    }

    #[test]
    fn lock_roundtrip_json_and_toml() {
        let lock = sample();
        let dir = tempfile::tempdir().unwrap();
        for (file, format) in [("trm-lock.json", LockFormat::Json), ("trm.lock.toml", LockFormat::Toml)] {
            let path = dir.path().join(file);
            lock.write_to_file(&path, format).unwrap();
            assert_eq!(LockFormat::from_path(&path), format);
            let loaded = Lockfile::read_from_file(&path, format).unwrap();
            assert_eq!(lock, loaded);
        }
    }

    #[test]
    fn first_insert_wins() {
        let mut lock = sample();
        assert!(!lock.insert(locked("core", "9.9.9", RegistryRef::Public)));
        let id = PackageIdentity {
            name: "core".to_owned(),
            registry: RegistryRef::Public,
        };
        assert_eq!(lock.get(&id).unwrap().version, "1.2.0");
        assert_eq!(lock.packages.len(), 2);
    }

    #[test]
    fn entry_for_respects_range() {
        let lock = sample();
        let id = PackageIdentity {
            name: "core".to_owned(),
            registry: RegistryRef::Public,
        };
        assert!(lock
            .entry_for(&id, &VersionRange::parse("^1.0.0").unwrap())
            .is_some());
        assert!(lock
            .entry_for(&id, &VersionRange::parse("^2.0.0").unwrap())
            .is_none());
    }

    #[test]
    fn duplicate_entries_are_rejected_on_read() {
        let mut lock = sample();
        lock.packages.push(locked("core", "1.3.0", RegistryRef::Public));
        let json = lock.to_string(LockFormat::Json).unwrap();
        assert!(matches!(
            Lockfile::from_str(&json, LockFormat::Json),
            Err(LockError::Duplicate { .. })
        ));
    }

    #[test]
    fn newer_lockfile_version_is_rejected() {
        let json = r#"{"lockfileVersion": 99, "packages": []}"#;
        assert!(matches!(
            Lockfile::from_str(json, LockFormat::Json),
            Err(LockError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[test]
    fn registry_is_recorded_as_endpoint() {
        let json = sample().to_string(LockFormat::Json).unwrap();
        assert!(json.contains("\"registry\": \"public\""));
        assert!(json.contains("\"registry\": \"https://private.example\""));
    }
}
