//! Package model for trm: manifests and their normalization, package identity,
//! version ranges, lock files, and the release artifact format.
//!
//! Everything here is pure data plus (de)serialization. Connectors to systems
//! and registries live in `trm-remote`; resolution and the publish/install
//! workflows live in `trm-core`.

pub mod artifact;
pub mod identity;
pub mod lock;
pub mod manifest;
pub mod normalize;
pub mod object;
pub mod range;
pub mod types;

pub use artifact::{Artifact, ArtifactError, TransportPayload, TransportRole};
pub use identity::{compare, Package, PackageIdentity, RegistryRef};
pub use lock::{LockError, LockFormat, LockedPackage, Lockfile};
pub use manifest::{
    parse_manifest_file, parse_manifest_str, Author, DependencyDecl, Manifest, ManifestError,
    SapEntries, SapEntry,
};
pub use normalize::{normalize_name, MAX_NAME_LEN};
pub use object::{ObjectKey, TransportEntry};
pub use range::{clean_version, VersionRange};
pub use types::{Integrity, TransportId};
