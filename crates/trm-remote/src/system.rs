use crate::RemoteError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use trm_schema::{
    Integrity, ObjectKey, Package, PackageIdentity, RegistryRef, SapEntry, TransportEntry,
    TransportId, TransportPayload,
};

const COMMENT_NAME: &str = "name=";
const COMMENT_VERSION: &str = "version=";
const COMMENT_REGISTRY: &str = "registry=";

/// An object directory row: who owns the object and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub key: ObjectKey,
    pub devclass: String,
    pub src_system: String,
    pub author: String,
}

/// One reference found in an object's usage environment.
///
/// `object_type` is the raw type code reported by the system, which is not
/// always a transportable type (`FUNC`, `METH`, `STRU`...). `enclosing`
/// carries the containing object when the system reports one, e.g. the class
/// of a method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageRecord {
    pub object_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosing: Option<String>,
}

impl UsageRecord {
    pub fn new(object_type: &str, name: &str) -> Self {
        Self {
            object_type: object_type.to_uppercase(),
            name: name.to_uppercase(),
            enclosing: None,
        }
    }

    #[must_use]
    pub fn within(mut self, enclosing: &str) -> Self {
        self.enclosing = Some(enclosing.to_uppercase());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Workbench,
    Customizing,
    /// Transport of copies: exported without touching object ownership.
    Copies,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportStatus {
    Modifiable,
    Released,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportRecord {
    pub id: TransportId,
    pub kind: TransportKind,
    pub status: TransportStatus,
    pub description: String,
    #[serde(default)]
    pub comments: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
}

impl TransportRecord {
    pub fn is_released(&self) -> bool {
        self.status == TransportStatus::Released
    }

    /// The package this transport was produced for, if it carries the
    /// `name=` / `version=` comment pair.
    pub fn trm_tag(&self) -> Option<TrmTag> {
        TrmTag::from_comments(&self.comments)
    }

    /// Release time, falling back to creation time for modifiable transports.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.released_at.unwrap_or(self.created_at)
    }
}

/// Package reference carried in the comments of a trm-relevant transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrmTag {
    pub name: String,
    pub version: String,
    pub registry: RegistryRef,
}

impl TrmTag {
    pub fn from_comments(comments: &[String]) -> Option<Self> {
        let value = |prefix: &str| {
            comments
                .iter()
                .find_map(|c| c.trim().strip_prefix(prefix))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        Some(Self {
            name: value(COMMENT_NAME)?.to_owned(),
            version: value(COMMENT_VERSION)?.to_owned(),
            registry: value(COMMENT_REGISTRY).map_or(RegistryRef::Public, RegistryRef::parse),
        })
    }

    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity {
            name: self.name.clone(),
            registry: self.registry.clone(),
        }
    }
}

/// The comment lines that mark a transport as produced for `name@version`.
pub fn trm_comments(name: &str, version: &str, registry: &RegistryRef) -> Vec<String> {
    let mut comments = vec![
        format!("{COMMENT_NAME}{name}"),
        format!("{COMMENT_VERSION}{version}"),
    ];
    if !registry.is_public() {
        comments.push(format!("{COMMENT_REGISTRY}{registry}"));
    }
    comments
}

/// Options for releasing a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOptions {
    /// Lock the transport's objects before release.
    pub lock: bool,
    /// Skip the system's own pre-release checks.
    pub bypass_check: bool,
    pub tmp_dir: Option<PathBuf>,
    /// Must be honored; expiry surfaces as [`RemoteError::Timeout`].
    pub timeout: Duration,
}

impl Default for ReleaseOptions {
    fn default() -> Self {
        Self {
            lock: true,
            bypass_check: false,
            tmp_dir: None,
            timeout: Duration::from_secs(180),
        }
    }
}

/// Everything trm needs from one transport system.
pub trait SystemConnector: Send + Sync {
    /// System id, e.g. `DEV`.
    fn system_id(&self) -> &str;

    // Object directory and usage lookups.

    fn get_object(&self, key: &ObjectKey) -> Result<Option<ObjectRecord>, RemoteError>;
    fn devclass_objects(
        &self,
        devclass: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectRecord>, RemoteError>;
    fn repository_environment(&self, key: &ObjectKey) -> Result<Vec<UsageRecord>, RemoteError>;
    /// Function group containing a function module.
    fn function_group(&self, function: &str) -> Result<Option<String>, RemoteError>;
    /// Every transport that contains `key`, in no particular order.
    fn object_transports(&self, key: &ObjectKey) -> Result<Vec<TransportRecord>, RemoteError>;

    // Installed packages.

    fn installed_packages(&self) -> Result<Vec<Package>, RemoteError>;
    fn package_integrity(&self, identity: &PackageIdentity) -> Result<Integrity, RemoteError>;
    /// Record a package as installed; replaces an earlier record of the same identity.
    fn register_installed(&self, package: &Package) -> Result<(), RemoteError>;

    // Target checks.

    fn check_entry_exists(&self, table: &str, entry: &SapEntry) -> Result<bool, RemoteError>;
    fn supported_object_types(&self) -> Result<Vec<String>, RemoteError>;

    // Transport primitives.

    fn create_transport(
        &self,
        kind: TransportKind,
        description: &str,
    ) -> Result<TransportId, RemoteError>;
    fn transport(&self, id: &TransportId) -> Result<TransportRecord, RemoteError>;
    fn transport_objects(&self, id: &TransportId) -> Result<Vec<TransportEntry>, RemoteError>;
    fn modifiable_transports(&self) -> Result<Vec<TransportRecord>, RemoteError>;
    fn add_objects(
        &self,
        id: &TransportId,
        entries: &[TransportEntry],
        lock: bool,
    ) -> Result<(), RemoteError>;
    fn add_comment(&self, id: &TransportId, comment: &str) -> Result<(), RemoteError>;
    fn set_documentation(&self, id: &TransportId, text: &str) -> Result<(), RemoteError>;
    /// Add translation entries for `entries` to `id`.
    fn add_translations(
        &self,
        id: &TransportId,
        entries: &[TransportEntry],
    ) -> Result<(), RemoteError>;
    /// Merge the content of customizing transports `sources` into `id`.
    fn add_customizing(&self, id: &TransportId, sources: &[TransportId])
        -> Result<(), RemoteError>;
    fn export_transport(&self, id: &TransportId) -> Result<Vec<u8>, RemoteError>;
    fn release_transport(
        &self,
        id: &TransportId,
        options: &ReleaseOptions,
    ) -> Result<(), RemoteError>;
    fn can_be_deleted(&self, id: &TransportId) -> Result<bool, RemoteError>;
    fn delete_transport(&self, id: &TransportId) -> Result<(), RemoteError>;
    /// Permanently exclude a transport from imports, for transports that can
    /// no longer be deleted.
    fn skip_transport(&self, id: &TransportId) -> Result<(), RemoteError>;
    fn import_transport(
        &self,
        payload: &TransportPayload,
        timeout: Duration,
    ) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(comments: Vec<String>) -> TransportRecord {
        TransportRecord {
            id: TransportId::new("DEVK900001"),
            kind: TransportKind::Copies,
            status: TransportStatus::Released,
            description: "test".to_owned(),
            comments,
            created_at: DateTime::<Utc>::default(),
            released_at: None,
        }
    }

    #[test]
    fn comments_roundtrip_through_tag() {
        let registry = RegistryRef::parse("https://private.example");
        let tag = record(trm_comments("billing", "1.2.0", &registry))
            .trm_tag()
            .unwrap();
        assert_eq!(tag.name, "billing");
        assert_eq!(tag.version, "1.2.0");
        assert_eq!(tag.registry, registry);
    }

    #[test]
    fn public_registry_is_implicit() {
        let comments = trm_comments("billing", "1.2.0", &RegistryRef::Public);
        assert_eq!(comments.len(), 2);
        let tag = record(comments).trm_tag().unwrap();
        assert!(tag.registry.is_public());
    }

    #[test]
    fn untagged_transport_is_not_trm_relevant() {
        assert!(record(vec!["name=billing".to_owned()]).trm_tag().is_none());
        assert!(record(vec!["random note".to_owned()]).trm_tag().is_none());
    }
}
