//! String identifiers that must not be mixed up with each other.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// A `String` wrapper that serializes as the bare string and reads like a `str`.
macro_rules! text_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
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
    };
}

text_id!(
    /// Content hash of a package artifact, `blake3-<hex>`.
    Integrity
);

text_id!(
    /// Identifier of a transport on the target system (e.g. `DEVK900123`).
    TransportId
);

impl Integrity {
    /// Prefix written in front of the hex digest.
    pub const PREFIX: &'static str = "blake3-";

    /// Hash arbitrary bytes into an integrity value.
    pub fn of(data: &[u8]) -> Self {
        Self(format!("{}{}", Self::PREFIX, blake3::hash(data).to_hex()))
    }
}
