use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("package name must not be empty")]
    EmptyName,
    #[error("invalid package name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
    #[error("package version must not be empty")]
    EmptyVersion,
    #[error("invalid package version '{0}', expected a semantic version")]
    InvalidVersion(String),
    #[error("invalid version range '{range}': {reason}")]
    InvalidRange { range: String, reason: String },
}

/// Package manifest as declared by the publisher and embedded in artifacts.
///
/// A freshly parsed manifest is raw; call [`Manifest::normalize`] before
/// relying on any of the invariants (lower-cased name, clean version, valid
/// urls, dropped malformed optional data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default = "default_true")]
    pub backwards_compatible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sap_entries: Option<SapEntries>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist_folder: Option<String>,
    /// Endpoint the manifest was obtained from. Runtime only: never exchanged
    /// and dropped by normalization unless runtime fields are kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Manifest {
    /// Minimal manifest with only the identity fields set.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            private: false,
            backwards_compatible: true,
            description: None,
            git: None,
            website: None,
            license: None,
            authors: Vec::new(),
            keywords: Vec::new(),
            dependencies: Vec::new(),
            sap_entries: None,
            dist_folder: None,
            registry: None,
        }
    }

    /// Serialize to the exchange form embedded in transport documentation.
    ///
    /// Runtime fields are stripped; the receiving side must not learn where
    /// the sender fetched the package from.
    pub fn to_exchange(&self) -> Result<String, ManifestError> {
        let mut exchanged = self.clone();
        exchanged.registry = None;
        Ok(serde_json::to_string_pretty(&exchanged)?)
    }

    /// Parse the exchange form. Fields this version does not know are dropped.
    pub fn from_exchange(input: &str) -> Result<Self, ManifestError> {
        let mut manifest: Self = serde_json::from_str(input)?;
        manifest.registry = None;
        Ok(manifest)
    }
}

/// A package author. Accepts either `{ "name", "email" }` or the compact
/// `"Name <email>"` string form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Author {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Author {
    pub fn parse(text: &str) -> Self {
        match text.split_once('<') {
            Some((name, rest)) => Self {
                name: name.trim().to_owned(),
                email: Some(rest.trim_end().trim_end_matches('>').trim().to_owned())
                    .filter(|e| !e.is_empty()),
            },
            None => Self {
                name: text.trim().to_owned(),
                email: None,
            },
        }
    }
}

impl<'de> Deserialize<'de> for Author {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum AuthorRepr {
            Text(String),
            Full {
                name: String,
                #[serde(default)]
                email: Option<String>,
            },
        }

        Ok(match AuthorRepr::deserialize(deserializer)? {
            AuthorRepr::Text(text) => Author::parse(&text),
            AuthorRepr::Full { name, email } => Author { name, email },
        })
    }
}

/// A declared dependency: `name` at a version range, with the integrity of
/// the artifact observed when the dependency was discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDecl {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub integrity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
}

/// Table-keyed platform entries a package requires on the target system.
pub type SapEntries = BTreeMap<String, Vec<SapEntry>>;

/// One open record of a platform table: ordered field/value pairs.
///
/// Field order is kept for display only; two entries with the same pairs in
/// a different order are equal.
#[derive(Debug, Clone, Default, Eq)]
pub struct SapEntry {
    fields: Vec<(String, String)>,
}

impl SapEntry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    /// Set a field, replacing the value in place if the field already exists.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(f, _)| *f == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(f, v)| (f.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn sorted(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self.fields().collect();
        pairs.sort_unstable();
        pairs
    }
}

impl PartialEq for SapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.sorted() == other.sorted()
    }
}

impl fmt::Display for SapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, value)) in self.fields().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field}={value}")?;
        }
        Ok(())
    }
}

impl Serialize for SapEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (field, value) in &self.fields {
            map.serialize_entry(field, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SapEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntryVisitor;

        impl<'de> Visitor<'de> for EntryVisitor {
            type Value = SapEntry;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<SapEntry, A::Error> {
                let mut entry = SapEntry::new();
                while let Some((field, value)) = access.next_entry::<String, String>()? {
                    entry.insert(field, value);
                }
                Ok(entry)
            }
        }

        deserializer.deserialize_map(EntryVisitor)
    }
}

pub fn parse_manifest_str(input: &str) -> Result<Manifest, ManifestError> {
    Ok(serde_json::from_str(input)?)
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<Manifest, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}
