//! The release artifact: the manifest plus every transport that makes up a
//! package release, packed into one deterministic tar archive.

use crate::manifest::{Manifest, ManifestError};
use crate::object::TransportEntry;
use crate::types::{Integrity, TransportId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use thiserror::Error;

const MANIFEST_ENTRY: &str = "manifest.json";
const TRANSPORT_DIR: &str = "transports/";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("artifact serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("artifact is missing '{0}'")]
    Missing(String),
}

/// The part a transport plays in a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportRole {
    ObjectList,
    PackageDefinition,
    Translations,
    Customizing,
}

impl TransportRole {
    /// Order in which transports are released on the source system and
    /// imported on the target: package definitions always come last.
    pub const APPLY_ORDER: [TransportRole; 4] = [
        TransportRole::ObjectList,
        TransportRole::Translations,
        TransportRole::Customizing,
        TransportRole::PackageDefinition,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ObjectList => "object-list",
            Self::PackageDefinition => "package-definition",
            Self::Translations => "translations",
            Self::Customizing => "customizing",
        }
    }

    fn apply_rank(self) -> usize {
        Self::APPLY_ORDER
            .iter()
            .position(|r| *r == self)
            .unwrap_or(Self::APPLY_ORDER.len())
    }
}

impl fmt::Display for TransportRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One exported transport inside an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportPayload {
    pub role: TransportRole,
    pub transport: TransportId,
    pub entries: Vec<TransportEntry>,
    #[serde(skip)]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub manifest: Manifest,
    pub transports: Vec<TransportPayload>,
}

impl Artifact {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            transports: Vec::new(),
        }
    }

    pub fn transport(&self, role: TransportRole) -> Option<&TransportPayload> {
        self.transports.iter().find(|t| t.role == role)
    }

    /// Transports sorted into [`TransportRole::APPLY_ORDER`].
    pub fn in_apply_order(&self) -> Vec<&TransportPayload> {
        let mut ordered: Vec<&TransportPayload> = self.transports.iter().collect();
        ordered.sort_by_key(|t| t.role.apply_rank());
        ordered
    }

    /// Pack into a tar archive. Headers carry no timestamps or ownership, so
    /// identical content always packs to identical bytes.
    pub fn pack(&self) -> Result<Vec<u8>, ArtifactError> {
        let mut ar = tar::Builder::new(Vec::new());
        append_entry(&mut ar, MANIFEST_ENTRY, self.manifest.to_exchange()?.as_bytes())?;
        for (i, payload) in self.transports.iter().enumerate() {
            let stem = format!("{TRANSPORT_DIR}{i:02}-{}", payload.role);
            append_entry(
                &mut ar,
                &format!("{stem}.json"),
                &serde_json::to_vec_pretty(payload)?,
            )?;
            append_entry(&mut ar, &format!("{stem}.data"), &payload.data)?;
        }
        Ok(ar.into_inner()?)
    }

    pub fn unpack(data: &[u8]) -> Result<Self, ArtifactError> {
        let mut files = BTreeMap::new();
        let mut ar = tar::Archive::new(data);
        for entry in ar.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_string_lossy().into_owned();
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            files.insert(path, content);
        }

        let manifest_bytes = files
            .get(MANIFEST_ENTRY)
            .ok_or_else(|| ArtifactError::Missing(MANIFEST_ENTRY.to_owned()))?;
        let manifest = Manifest::from_exchange(&String::from_utf8_lossy(manifest_bytes))?;

        let mut transports = Vec::new();
        for (path, content) in &files {
            let Some(stem) = path
                .strip_prefix(TRANSPORT_DIR)
                .and_then(|p| p.strip_suffix(".json"))
            else {
                continue;
            };
            let mut payload: TransportPayload = serde_json::from_slice(content)?;
            let data_path = format!("{TRANSPORT_DIR}{stem}.data");
            payload.data = files
                .get(&data_path)
                .cloned()
                .ok_or(ArtifactError::Missing(data_path))?;
            transports.push(payload);
        }

        Ok(Self {
            manifest,
            transports,
        })
    }

    /// Integrity of packed artifact bytes.
    pub fn integrity(packed: &[u8]) -> Integrity {
        Integrity::of(packed)
    }
}

fn append_entry(
    ar: &mut tar::Builder<Vec<u8>>,
    path: &str,
    data: &[u8],
) -> Result<(), ArtifactError> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(0o644);
    header.set_size(data.len() as u64);
    header.set_cksum();
    ar.append_data(&mut header, path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKey;

    fn sample() -> Artifact {
        let mut artifact = Artifact::new(Manifest::new("billing", "1.0.0"));
        artifact.transports.push(TransportPayload {
            role: TransportRole::PackageDefinition,
            transport: TransportId::new("DEVK900002"),
            entries: vec![TransportEntry::new(ObjectKey::r3tr("DEVC", "ZBILL"), Some("ZBILL"))],
            data: b"devc".to_vec(),
        });
        artifact.transports.push(TransportPayload {
            role: TransportRole::ObjectList,
            transport: TransportId::new("DEVK900001"),
            entries: vec![TransportEntry::new(ObjectKey::r3tr("CLAS", "ZCL_BILL"), Some("ZBILL"))],
            data: b"objects".to_vec(),
        });
        artifact
    }

    #[test]
    fn pack_unpack_preserves_content() {
        let artifact = sample();
        let packed = artifact.pack().unwrap();
        let unpacked = Artifact::unpack(&packed).unwrap();
        assert_eq!(unpacked, artifact);
    }

    #[test]
    fn packing_is_deterministic() {
        let a = sample().pack().unwrap();
        let b = sample().pack().unwrap();
        assert_eq!(Artifact::integrity(&a), Artifact::integrity(&b));
    }

    #[test]
    fn apply_order_puts_package_definition_last() {
        let artifact = sample();
        let roles: Vec<TransportRole> = artifact.in_apply_order().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![TransportRole::ObjectList, TransportRole::PackageDefinition]
        );
    }

    #[test]
    fn unpack_rejects_archive_without_manifest() {
        let mut ar = tar::Builder::new(Vec::new());
        append_entry(&mut ar, "other.txt", b"x").unwrap();
        let data = ar.into_inner().unwrap();
        assert!(matches!(
            Artifact::unpack(&data),
            Err(ArtifactError::Missing(_))
        ));
    }
}
