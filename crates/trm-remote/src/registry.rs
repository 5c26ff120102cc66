use crate::RemoteError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trm_schema::{Integrity, RegistryRef, VersionRange};

/// One published version of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub version: String,
    pub integrity: Integrity,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
}

/// Package document as returned for a tag: every published version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    #[serde(default)]
    pub versions: Vec<String>,
}

/// A package registry.
pub trait RegistryConnector: Send + Sync {
    /// Which registry this connector talks to.
    fn registry(&self) -> RegistryRef;

    fn package_exists(&self, name: &str, version: Option<&str>) -> Result<bool, RemoteError>;
    fn releases(&self, name: &str, range: &VersionRange) -> Result<Vec<Release>, RemoteError>;
    fn package(&self, name: &str, tag: &str) -> Result<PackageInfo, RemoteError>;
    fn artifact(&self, name: &str, version: &str) -> Result<Vec<u8>, RemoteError>;
    fn publish_artifact(
        &self,
        name: &str,
        version: &str,
        artifact: &[u8],
        readme: Option<&str>,
    ) -> Result<(), RemoteError>;
    /// Whether the current user may publish releases of `name`.
    fn can_publish_releases(&self, name: &str) -> Result<bool, RemoteError>;

    /// The release of exactly `version`.
    fn release(&self, name: &str, version: &str) -> Result<Release, RemoteError> {
        let missing = || RemoteError::NotFound(format!("{name}@{version}"));
        let version = trm_schema::clean_version(version).ok_or_else(missing)?;
        self.releases(name, &VersionRange::exact(&version))?
            .into_iter()
            .find(|r| trm_schema::clean_version(&r.version).as_ref() == Some(&version))
            .ok_or_else(missing)
    }
}
