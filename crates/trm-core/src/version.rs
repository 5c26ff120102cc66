//! Picking the release to install for a range, honoring lock files.

use crate::CoreError;
use tracing::{debug, info};
use trm_remote::{RegistryConnector, RemoteError};
use trm_schema::{clean_version, Integrity, Lockfile, PackageIdentity, VersionRange};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub version: String,
    /// Integrity the registry reports for this release.
    pub integrity: Integrity,
    /// Chosen from a lock entry rather than by range selection.
    pub locked: bool,
}

/// Highest of `versions` that satisfies `range`. Unparsable versions are ignored.
pub fn pick_version<S: AsRef<str>>(versions: &[S], range: &VersionRange) -> Option<String> {
    versions
        .iter()
        .filter_map(|raw| clean_version(raw.as_ref()).map(|v| (v, raw.as_ref())))
        .filter(|(v, _)| range.matches(v))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, raw)| raw.to_owned())
}

pub struct VersionResolver<'a> {
    registry: &'a dyn RegistryConnector,
}

impl<'a> VersionResolver<'a> {
    pub fn new(registry: &'a dyn RegistryConnector) -> Self {
        Self { registry }
    }

    /// Resolve `name` within `range`.
    ///
    /// A lock entry for the package whose version satisfies `range` wins
    /// over newer releases, provided the registry still reports the locked
    /// integrity for it.
    pub fn resolve(
        &self,
        name: &str,
        range: &VersionRange,
        lock: Option<&Lockfile>,
    ) -> Result<ResolvedVersion, CoreError> {
        let identity = PackageIdentity::new(name, self.registry.registry())?;
        if let Some(locked) = lock.and_then(|l| l.entry_for(&identity, range)) {
            let release = self
                .registry
                .release(name, &locked.version)
                .map_err(|e| not_found(e, name, &locked.version))?;
            if release.integrity != locked.integrity {
                return Err(CoreError::Integrity {
                    package: format!("{identity}@{}", locked.version),
                    expected: locked.integrity.to_string(),
                    actual: release.integrity.to_string(),
                });
            }
            debug!("{identity}: using locked version {}", locked.version);
            return Ok(ResolvedVersion {
                version: locked.version.clone(),
                integrity: release.integrity,
                locked: true,
            });
        }

        let info = self
            .registry
            .package(name, "latest")
            .map_err(|e| not_found(e, name, &range.to_string()))?;
        let version = pick_version(&info.versions, range).ok_or_else(|| {
            CoreError::ReleaseNotFound {
                name: name.to_owned(),
                range: range.to_string(),
            }
        })?;
        let release = self
            .registry
            .release(name, &version)
            .map_err(|e| not_found(e, name, &version))?;
        info!("{identity}: resolved {range} to {version}");
        Ok(ResolvedVersion {
            version,
            integrity: release.integrity,
            locked: false,
        })
    }
}

fn not_found(error: RemoteError, name: &str, range: &str) -> CoreError {
    match error {
        RemoteError::NotFound(_) => CoreError::ReleaseNotFound {
            name: name.to_owned(),
            range: range.to_owned(),
        },
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_satisfying_version_wins() {
        let versions = ["1.0.0", "1.10.0", "1.9.0", "2.0.0", "garbage"];
        let range = VersionRange::parse("^1.0.0").unwrap();
        assert_eq!(pick_version(&versions, &range).as_deref(), Some("1.10.0"));
        let range = VersionRange::parse(">=1.0.0 <1.9.0").unwrap();
        assert_eq!(pick_version(&versions, &range).as_deref(), Some("1.0.0"));
        let range = VersionRange::parse("^3.0.0").unwrap();
        assert_eq!(pick_version(&versions, &range), None);
    }

    #[test]
    fn any_range_picks_latest() {
        let versions = vec!["0.1.0".to_owned(), "0.2.0".to_owned()];
        assert_eq!(
            pick_version(&versions, &VersionRange::any()).as_deref(),
            Some("0.2.0")
        );
    }
}
