//! Dependency discovery and release orchestration for trm.
//!
//! This crate turns the package model of `trm-schema` and the connector
//! contracts of `trm-remote` into workflows: the [`DependencyResolver`] that
//! derives a package's dependencies from object usage, the [`VersionResolver`]
//! that picks and verifies a release, the lock file builder, and the
//! [`PublishSaga`] / [`InstallSaga`] that drive transports on a system with
//! compensation on failure.

pub mod concurrency;
pub mod config;
pub mod context;
pub mod dependency;
pub mod install;
pub mod lockgen;
pub mod parsers;
pub mod publish;
pub mod saga;
pub mod version;

pub use concurrency::install_signal_handler;
pub use config::{CoreConfig, VendorConfig};
pub use context::{init_logging, Context, Defaults, FixedAnswer, Prompt};
pub use dependency::{
    DependencyEdge, DependencyNode, DependencyReport, DependencyResolver, EdgeTarget, Owner,
};
pub use install::{InstallOptions, InstallResult, InstallSaga, RegistrySet};
pub use lockgen::build_lockfile;
pub use parsers::ObjectParsers;
pub use publish::{PublishOptions, PublishResult, PublishSaga, ReleaseTransport};
pub use saga::{Saga, SagaStep, StepState};
pub use version::{pick_version, ResolvedVersion, VersionResolver};

use thiserror::Error;
use trm_remote::RemoteError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] trm_schema::ManifestError),
    #[error("integrity mismatch for {package}: expected {expected}, got {actual}; cannot continue due to security issues")]
    Integrity {
        package: String,
        expected: String,
        actual: String,
    },
    #[error("no integrity available for {0}")]
    MissingIntegrity(String),
    #[error("no release of {name} found in range {range}")]
    ReleaseNotFound { name: String, range: String },
    #[error("resolution error: {0}")]
    Resolution(String),
    #[error("{step} failed: {source}{}", cleanup_note(.manual_cleanup))]
    SagaStep {
        step: String,
        #[source]
        source: Box<CoreError>,
        manual_cleanup: bool,
    },
    #[error("unsupported content: {0}")]
    UnsupportedContent(String),
    #[error("package includes objects without an owning unit: {}", .0.join(", "))]
    OrphanObjects(Vec<String>),
    #[error("missing SAP entries: {}", .0.join("; "))]
    MissingSapEntries(Vec<String>),
    #[error("operation cancelled")]
    Cancelled,
    #[error("{name} {version} is already published")]
    AlreadyPublished { name: String, version: String },
    #[error("not authorized to publish {0}")]
    PublishDenied(String),
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("lock error: {0}")]
    Lock(#[from] trm_schema::LockError),
    #[error("artifact error: {0}")]
    Artifact(#[from] trm_schema::ArtifactError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn cleanup_note(manual_cleanup: &bool) -> &'static str {
    if *manual_cleanup {
        "; manual cleanup may be required"
    } else {
        ""
    }
}

impl CoreError {
    /// Whether the root cause is a remote call that ran out of time.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Remote(e) => e.is_timeout(),
            Self::SagaStep { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Whether partial state was left on a system or registry.
    pub fn manual_cleanup_required(&self) -> bool {
        matches!(
            self,
            Self::SagaStep {
                manual_cleanup: true,
                ..
            }
        )
    }

    pub(crate) fn step(step: impl Into<String>, source: CoreError, manual_cleanup: bool) -> Self {
        Self::SagaStep {
            step: step.into(),
            source: Box::new(source),
            manual_cleanup,
        }
    }
}
