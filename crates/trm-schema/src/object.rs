use serde::{Deserialize, Serialize};
use std::fmt;

/// Program id of repository objects that own a row in the object directory.
pub const PGMID_R3TR: &str = "R3TR";
/// Object type of package containers (devclasses).
pub const DEVC: &str = "DEVC";

/// Key of a transportable object: program id, object type, and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub pgmid: String,
    pub object_type: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(pgmid: &str, object_type: &str, name: &str) -> Self {
        Self {
            pgmid: pgmid.trim().to_uppercase(),
            object_type: object_type.trim().to_uppercase(),
            name: name.trim().to_uppercase(),
        }
    }

    pub fn r3tr(object_type: &str, name: &str) -> Self {
        Self::new(PGMID_R3TR, object_type, name)
    }

    pub fn is_devclass(&self) -> bool {
        self.pgmid == PGMID_R3TR && self.object_type == DEVC
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.pgmid, self.object_type, self.name)
    }
}

/// One row of a transport's object list, with the devclass owning it when known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportEntry {
    #[serde(flatten)]
    pub key: ObjectKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devclass: Option<String>,
}

impl TransportEntry {
    pub fn new(key: ObjectKey, devclass: Option<&str>) -> Self {
        Self {
            key,
            devclass: devclass.map(str::to_uppercase),
        }
    }
}
