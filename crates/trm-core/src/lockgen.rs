//! Lock file generation from what is installed on a system.

use crate::config::CoreConfig;
use crate::context::Context;
use crate::CoreError;
use std::collections::VecDeque;
use tracing::{debug, info};
use trm_remote::SystemConnector;
use trm_schema::{
    clean_version, DependencyDecl, LockedPackage, Lockfile, Package, PackageIdentity,
    VersionRange,
};

/// Walk the declared dependencies of `root` breadth first and pin each one
/// to the version and integrity installed on `system`.
///
/// Registry aliases are resolved to their endpoints. When the same package
/// is reached twice, the first entry wins and its dependencies are not
/// queued again.
pub fn build_lockfile(
    system: &dyn SystemConnector,
    config: &CoreConfig,
    ctx: &Context,
    root: &Package,
) -> Result<Lockfile, CoreError> {
    let installed = system.installed_packages()?;
    let mut lock = Lockfile::for_root(&root.manifest.name, &root.manifest.version);
    let mut queue: VecDeque<DependencyDecl> = root.manifest.dependencies.iter().cloned().collect();

    while let Some(decl) = queue.pop_front() {
        let registry = config.resolve_registry(decl.registry.as_deref());
        let identity = PackageIdentity::new(&decl.name, registry)?;
        if lock.get(&identity).is_some() {
            debug!("{identity} already locked");
            continue;
        }

        let package = installed
            .iter()
            .find(|p| p.identity() == identity)
            .ok_or_else(|| {
                CoreError::Resolution(format!(
                    "dependency {identity} of {} is not installed",
                    root.manifest.name
                ))
            })?;

        let range = VersionRange::parse(&decl.version)?;
        let satisfied = clean_version(&package.manifest.version).is_some_and(|v| range.matches(&v));
        if !satisfied {
            ctx.warn(format!(
                "installed {identity} {} does not satisfy {range}",
                package.manifest.version
            ));
        }

        let integrity = match &package.integrity {
            Some(integrity) => integrity.clone(),
            None => system
                .package_integrity(&identity)
                .map_err(|e| CoreError::MissingIntegrity(format!("{identity}: {e}")))?,
        };
        lock.insert(LockedPackage {
            name: identity.name.clone(),
            version: package.manifest.version.clone(),
            registry: identity.registry.clone(),
            integrity,
        });
        queue.extend(package.manifest.dependencies.iter().cloned());
    }

    info!(
        "locked {} packages for {}",
        lock.packages.len(),
        root.manifest.name
    );
    Ok(lock)
}
