//! Connector contracts between trm and the outside world.
//!
//! The core never talks to a transport system or a registry directly. It goes
//! through [`SystemConnector`] (objects, transports, installed packages on one
//! system) and [`RegistryConnector`] (published releases and artifacts). The
//! wire protocols behind them live elsewhere; [`mock`] provides in-memory
//! implementations that behave like the real thing for tests.

pub mod config;
pub mod mock;
pub mod registry;
pub mod system;

pub use config::RemoteConfig;
pub use registry::{PackageInfo, RegistryConnector, Release};
pub use system::{
    trm_comments, ObjectRecord, ReleaseOptions, SystemConnector, TransportKind, TransportRecord,
    TransportStatus, TrmTag, UsageRecord,
};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout { operation: String, after: Duration },
    #[error("remote error: {0}")]
    Remote(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    Denied(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("remote config error: {0}")]
    Config(String),
}

impl RemoteError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_distinct_from_remote_failure() {
        let timeout = RemoteError::Timeout {
            operation: "release DEVK900001".to_owned(),
            after: Duration::from_secs(180),
        };
        assert!(timeout.is_timeout());
        assert_eq!(timeout.to_string(), "release DEVK900001 timed out after 180s");
        assert!(!RemoteError::Remote("locked".to_owned()).is_timeout());
    }
}
