use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use trm_remote::{ObjectRecord, RemoteConfig};
use trm_schema::RegistryRef;

/// Markers identifying objects shipped by the platform vendor.
///
/// A marker ending in `*` matches as a prefix; all matching ignores case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    pub systems: Vec<String>,
    pub authors: Vec<String>,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            systems: vec!["SAP".to_owned()],
            authors: vec!["SAP".to_owned(), "SAP*".to_owned(), "DDIC".to_owned()],
        }
    }
}

impl VendorConfig {
    pub fn is_vendor(&self, record: &ObjectRecord) -> bool {
        self.systems
            .iter()
            .any(|m| marker_matches(m, &record.src_system))
            || self.authors.iter().any(|m| marker_matches(m, &record.author))
    }
}

fn marker_matches(marker: &str, value: &str) -> bool {
    let marker = marker.trim().to_uppercase();
    let value = value.trim().to_uppercase();
    if value.is_empty() {
        return false;
    }
    match marker.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => value == marker,
    }
}

/// Settings shared by all workflows, read from `~/.config/trm/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub release_timeout_secs: u64,
    pub import_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmp_dir: Option<PathBuf>,
    /// Default install policy: require verified integrity before any change.
    pub safe: bool,
    /// Object types allowed in customizing transports.
    pub customizing_types: Vec<String>,
    pub vendor: VendorConfig,
    /// Registry aliases.
    pub registries: BTreeMap<String, RemoteConfig>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            release_timeout_secs: 180,
            import_timeout_secs: 600,
            tmp_dir: None,
            safe: false,
            customizing_types: ["TABU", "CDAT", "VDAT", "TDAT"]
                .iter()
                .map(|t| (*t).to_owned())
                .collect(),
            vendor: VendorConfig::default(),
            registries: BTreeMap::new(),
        }
    }
}

impl CoreConfig {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Load `~/.config/trm/config.toml`, or the defaults if it does not exist.
    pub fn load_default() -> Result<Self, CoreError> {
        let home =
            std::env::var("HOME").map_err(|_| CoreError::Config("HOME not set".to_owned()))?;
        let path = PathBuf::from(home).join(".config/trm/config.toml");
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn release_timeout(&self) -> Duration {
        Duration::from_secs(self.release_timeout_secs)
    }

    pub fn import_timeout(&self) -> Duration {
        Duration::from_secs(self.import_timeout_secs)
    }

    /// Turn a registry as written in a manifest (alias, endpoint, or nothing)
    /// into the registry it denotes. Aliases never survive this call.
    pub fn resolve_registry(&self, raw: Option<&str>) -> RegistryRef {
        match raw.map(str::trim).filter(|r| !r.is_empty()) {
            None => RegistryRef::Public,
            Some(raw) => match self.registries.get(raw) {
                Some(remote) => RegistryRef::parse(&remote.url),
                None => RegistryRef::parse(raw),
            },
        }
    }

    pub fn is_customizing_type(&self, object_type: &str) -> bool {
        self.customizing_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(object_type))
    }
}
