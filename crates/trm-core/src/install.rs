//! Installing a package release and its dependencies onto a system.
//!
//! Everything that can reject a release (integrity, content, required
//! table entries, dependencies) is checked before the first transport is
//! imported. Imports cannot be undone, so only the install transport
//! created for the run is rolled back, and only while nothing has been
//! imported yet.

use crate::config::CoreConfig;
use crate::context::Context;
use crate::saga::{Saga, StepState};
use crate::version::VersionResolver;
use crate::CoreError;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use trm_remote::{RegistryConnector, SystemConnector, TransportKind};
use trm_schema::object::PGMID_R3TR;
use trm_schema::{
    clean_version, Artifact, ArtifactError, Integrity, Lockfile, Package, PackageIdentity,
    RegistryRef, TransportEntry, TransportId, TransportRole, VersionRange,
};

/// Comment marking the workbench transport that collects installed objects.
const INSTALL_COMMENT: &str = "install=";

/// Registry connectors available to an install, one per registry.
#[derive(Default, Clone)]
pub struct RegistrySet {
    registries: Vec<Arc<dyn RegistryConnector>>,
}

impl RegistrySet {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, registry: Arc<dyn RegistryConnector>) -> Self {
        self.add(registry);
        self
    }

    /// Add a connector, replacing one for the same registry.
    pub fn add(&mut self, registry: Arc<dyn RegistryConnector>) {
        let target = registry.registry();
        self.registries.retain(|r| r.registry() != target);
        self.registries.push(registry);
    }

    pub fn get(&self, registry: &RegistryRef) -> Result<&dyn RegistryConnector, CoreError> {
        self.registries
            .iter()
            .find(|r| &r.registry() == registry)
            .map(Arc::as_ref)
            .ok_or_else(|| CoreError::Resolution(format!("no connector for registry {registry}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    /// Require a matching integrity for every package. Also enabled by
    /// [`CoreConfig::safe`].
    pub safe: bool,
    /// Reinstall packages that are already installed.
    pub force: bool,
    /// Reject artifacts with object types the system does not support.
    pub check_object_types: bool,
    /// Pins dependency versions and integrities.
    pub lock: Option<Lockfile>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            safe: false,
            force: false,
            check_object_types: true,
            lock: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallResult {
    pub package: Package,
    /// Already installed; nothing was done.
    pub skipped: bool,
    /// Dependencies installed along the way, in install order.
    pub installed_dependencies: Vec<Package>,
    /// Workbench transport that collected the installed objects.
    pub install_transport: Option<TransportId>,
    pub warnings: Vec<String>,
}

struct Outcome {
    package: Package,
    skipped: bool,
    install_transport: Option<TransportId>,
}

pub struct InstallSaga<'a> {
    system: &'a dyn SystemConnector,
    registries: &'a RegistrySet,
    config: &'a CoreConfig,
    ctx: &'a Context,
}

impl<'a> InstallSaga<'a> {
    pub fn new(
        system: &'a dyn SystemConnector,
        registries: &'a RegistrySet,
        config: &'a CoreConfig,
        ctx: &'a Context,
    ) -> Self {
        Self {
            system,
            registries,
            config,
            ctx,
        }
    }

    /// Resolve `range` on `registry`, then install the chosen release.
    pub fn install_range(
        &self,
        name: &str,
        range: &VersionRange,
        registry: &RegistryRef,
        options: &InstallOptions,
    ) -> Result<InstallResult, CoreError> {
        let connector = self.registries.get(registry)?;
        let resolved = VersionResolver::new(connector).resolve(name, range, options.lock.as_ref())?;
        self.install(
            name,
            &resolved.version,
            registry,
            Some(&resolved.integrity),
            options,
        )
    }

    /// Install exactly `name@version`. `expected` is the integrity the
    /// artifact must have.
    pub fn install(
        &self,
        name: &str,
        version: &str,
        registry: &RegistryRef,
        expected: Option<&Integrity>,
        options: &InstallOptions,
    ) -> Result<InstallResult, CoreError> {
        let mut path = Vec::new();
        let mut installed_dependencies = Vec::new();
        let outcome = self.install_package(
            name,
            version,
            registry,
            expected,
            options,
            &mut path,
            &mut installed_dependencies,
        );
        let warnings = self.ctx.take_warnings();
        let outcome = outcome?;
        Ok(InstallResult {
            package: outcome.package,
            skipped: outcome.skipped,
            installed_dependencies,
            install_transport: outcome.install_transport,
            warnings,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn install_package(
        &self,
        name: &str,
        version: &str,
        registry: &RegistryRef,
        expected: Option<&Integrity>,
        options: &InstallOptions,
        path: &mut Vec<PackageIdentity>,
        installed_dependencies: &mut Vec<Package>,
    ) -> Result<Outcome, CoreError> {
        self.ctx.check_cancelled()?;
        let identity = PackageIdentity::new(name, registry.clone())?;

        if !options.force {
            if let Some(current) = self.installed(&identity)? {
                if same_version(&current.manifest.version, version) {
                    info!("{identity} {version} is already installed");
                    return Ok(Outcome {
                        package: current,
                        skipped: true,
                        install_transport: None,
                    });
                }
            }
        }

        let connector = self.registries.get(registry)?;
        let bytes = connector.artifact(name, version)?;
        let artifact = Artifact::unpack(&bytes)?;
        let actual = Artifact::integrity(&bytes);
        let manifest = artifact.manifest.normalize(false)?;
        if manifest.name != identity.name {
            return Err(CoreError::Resolution(format!(
                "artifact for {identity} contains {}",
                manifest.name
            )));
        }

        self.verify_integrity(&identity, version, expected, &actual, options)?;
        self.check_content(&artifact, options)?;
        self.check_sap_entries(&identity, &artifact)?;

        path.push(identity.clone());
        for decl in &manifest.dependencies {
            let dep_identity = PackageIdentity::new(
                &decl.name,
                self.config.resolve_registry(decl.registry.as_deref()),
            )?;
            if path.contains(&dep_identity) {
                self.ctx.warn(format!(
                    "circular dependency {identity} -> {dep_identity}, not following it"
                ));
                continue;
            }
            let range = VersionRange::parse(&decl.version)?;
            let step = format!("install dependency {dep_identity}");
            let dependency = match self.install_dependency(
                &dep_identity,
                &range,
                options,
                path,
                installed_dependencies,
            ) {
                Ok(dependency) => dependency,
                Err(e) => {
                    // Earlier dependencies of this run stay imported.
                    let cleanup =
                        e.manual_cleanup_required() || !installed_dependencies.is_empty();
                    return Err(CoreError::step(step, e, cleanup));
                }
            };
            if let Some(package) = dependency {
                installed_dependencies.push(package);
            }
        }
        path.pop();

        let package = Package {
            manifest,
            registry: registry.clone(),
            integrity: Some(actual),
        };
        let prior_imports = !installed_dependencies.is_empty();
        let install_transport = self.apply(&identity, &artifact, &package, prior_imports)?;
        info!("installed {identity} {version}");
        Ok(Outcome {
            package,
            skipped: false,
            install_transport,
        })
    }

    /// Install one dependency unless a suitable version is already there.
    /// Returns the package when something was installed.
    fn install_dependency(
        &self,
        identity: &PackageIdentity,
        range: &VersionRange,
        options: &InstallOptions,
        path: &mut Vec<PackageIdentity>,
        installed_dependencies: &mut Vec<Package>,
    ) -> Result<Option<Package>, CoreError> {
        let lock = options.lock.as_ref();
        if !options.force {
            if let Some(current) = self.installed(identity)? {
                let installed = &current.manifest.version;
                let satisfied = match lock.and_then(|l| l.entry_for(identity, range)) {
                    Some(locked) => same_version(&locked.version, installed),
                    None => clean_version(installed).is_some_and(|v| range.matches(&v)),
                };
                if satisfied {
                    debug!("{identity} {installed} satisfies {range}");
                    return Ok(None);
                }
            }
        }

        let connector = self.registries.get(&identity.registry)?;
        let resolved = VersionResolver::new(connector).resolve(&identity.name, range, lock)?;
        let outcome = self.install_package(
            &identity.name,
            &resolved.version,
            &identity.registry,
            Some(&resolved.integrity),
            options,
            path,
            installed_dependencies,
        )?;
        Ok((!outcome.skipped).then_some(outcome.package))
    }

    fn installed(&self, identity: &PackageIdentity) -> Result<Option<Package>, CoreError> {
        Ok(self
            .system
            .installed_packages()?
            .into_iter()
            .find(|p| &p.identity() == identity))
    }

    fn verify_integrity(
        &self,
        identity: &PackageIdentity,
        version: &str,
        expected: Option<&Integrity>,
        actual: &Integrity,
        options: &InstallOptions,
    ) -> Result<(), CoreError> {
        let safe = options.safe || self.config.safe;
        match expected {
            None if safe => Err(CoreError::MissingIntegrity(format!("{identity}@{version}"))),
            None => {
                debug!("no expected integrity for {identity}@{version}");
                Ok(())
            }
            Some(expected) if expected == actual => Ok(()),
            Some(expected) => {
                let error = CoreError::Integrity {
                    package: format!("{identity}@{version}"),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                };
                if safe {
                    return Err(error);
                }
                self.ctx.warn(format!("{error}; installing anyway"));
                Ok(())
            }
        }
    }

    /// Every object must belong to a devclass the release defines, and with
    /// `check_object_types` every type must be known to the system.
    fn check_content(
        &self,
        artifact: &Artifact,
        options: &InstallOptions,
    ) -> Result<(), CoreError> {
        let objects = artifact
            .transport(TransportRole::ObjectList)
            .ok_or_else(|| ArtifactError::Missing(TransportRole::ObjectList.to_string()))?;
        let definitions = artifact
            .transport(TransportRole::PackageDefinition)
            .ok_or_else(|| ArtifactError::Missing(TransportRole::PackageDefinition.to_string()))?;

        let devclasses: BTreeSet<&str> = definitions
            .entries
            .iter()
            .filter(|e| e.key.is_devclass())
            .map(|e| e.key.name.as_str())
            .collect();
        let orphans: Vec<String> = objects
            .entries
            .iter()
            .filter(|e| e.key.pgmid == PGMID_R3TR)
            .filter(|e| {
                e.devclass
                    .as_deref()
                    .is_none_or(|d| !devclasses.contains(d))
            })
            .map(|e| e.key.to_string())
            .collect();
        if !orphans.is_empty() {
            return Err(CoreError::OrphanObjects(orphans));
        }

        if options.check_object_types {
            let supported: BTreeSet<String> = self
                .system
                .supported_object_types()?
                .into_iter()
                .map(|t| t.to_uppercase())
                .collect();
            let unsupported: BTreeSet<&str> = objects
                .entries
                .iter()
                .chain(&definitions.entries)
                .filter(|e| e.key.pgmid == PGMID_R3TR && !supported.contains(&e.key.object_type))
                .map(|e| e.key.object_type.as_str())
                .collect();
            if !unsupported.is_empty() {
                return Err(CoreError::UnsupportedContent(format!(
                    "object types not supported by {}: {}",
                    self.system.system_id(),
                    unsupported.into_iter().collect::<Vec<_>>().join(", ")
                )));
            }
        }
        Ok(())
    }

    fn check_sap_entries(
        &self,
        identity: &PackageIdentity,
        artifact: &Artifact,
    ) -> Result<(), CoreError> {
        let Some(tables) = &artifact.manifest.sap_entries else {
            return Ok(());
        };
        let mut missing = Vec::new();
        for (table, rows) in tables {
            for row in rows {
                if !self.system.check_entry_exists(table, row)? {
                    missing.push(format!("{table}: {row}"));
                }
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            debug!("{identity} requires {} missing entries", missing.len());
            Err(CoreError::MissingSapEntries(missing))
        }
    }

    /// Import the release and record it. The install transport is only
    /// rolled back if no transport was imported yet. `prior_imports` is set
    /// when dependencies were already imported during this run.
    fn apply(
        &self,
        identity: &PackageIdentity,
        artifact: &Artifact,
        package: &Package,
        prior_imports: bool,
    ) -> Result<Option<TransportId>, CoreError> {
        let mut saga: Saga<TransportId> = Saga::new(format!("install {identity}"));
        let result = self.apply_steps(&mut saga, identity, artifact, package);
        match result {
            Ok(transport) => Ok(transport),
            Err((step, error)) => {
                if saga.has_released() {
                    return Err(CoreError::step(step, error, true));
                }
                let leftovers = saga.compensate(|step| {
                    self.system.delete_transport(&step.resource)?;
                    Ok(StepState::Compensated)
                });
                for (name, e) in &leftovers {
                    self.ctx.warn(format!("{name} was not rolled back: {e}"));
                }
                Err(CoreError::step(
                    step,
                    error,
                    prior_imports || !leftovers.is_empty(),
                ))
            }
        }
    }

    fn apply_steps(
        &self,
        saga: &mut Saga<TransportId>,
        identity: &PackageIdentity,
        artifact: &Artifact,
        package: &Package,
    ) -> Result<Option<TransportId>, (String, CoreError)> {
        let follow = follow_entries(artifact);
        let transport = if follow.is_empty() {
            None
        } else {
            let step = "prepare install transport";
            Some(
                self.install_transport(saga, identity)
                    .map_err(|e| (step.to_owned(), e))?,
            )
        };

        for payload in artifact.in_apply_order() {
            let step = format!("import {} transport {}", payload.role, payload.transport);
            self.ctx
                .check_cancelled()
                .map_err(|e| (step.clone(), e))?;
            self.system
                .import_transport(payload, self.config.import_timeout())
                .map_err(|e| (step.clone(), e.into()))?;
            let index = saga.record(step, payload.transport.clone(), false);
            saga.mark_released(index);
        }

        if let Some(id) = &transport {
            self.system
                .add_objects(id, &follow, false)
                .map_err(|e| (format!("add objects to {id}"), e.into()))?;
        }
        self.system
            .register_installed(package)
            .map_err(|e| ("register package".to_owned(), e.into()))?;
        Ok(transport)
    }

    /// Reuse the open install transport of this package, or create one.
    fn install_transport(
        &self,
        saga: &mut Saga<TransportId>,
        identity: &PackageIdentity,
    ) -> Result<TransportId, CoreError> {
        let marker = format!("{INSTALL_COMMENT}{}", identity.name);
        let existing = self
            .system
            .modifiable_transports()?
            .into_iter()
            .find(|t| t.kind == TransportKind::Workbench && t.comments.contains(&marker));
        if let Some(transport) = existing {
            debug!("reusing install transport {}", transport.id);
            return Ok(transport.id);
        }
        let id = self
            .system
            .create_transport(TransportKind::Workbench, &format!("trm install {identity}"))?;
        saga.record("create install transport", id.clone(), true);
        self.system.add_comment(&id, &marker)?;
        Ok(id)
    }
}

/// Objects that must follow the package outside its namespace: everything
/// not in a `/NAMESPACE/`, plus the devclasses.
fn follow_entries(artifact: &Artifact) -> Vec<TransportEntry> {
    [TransportRole::ObjectList, TransportRole::PackageDefinition]
        .into_iter()
        .filter_map(|role| artifact.transport(role))
        .flat_map(|payload| payload.entries.iter())
        .filter(|e| e.key.pgmid == PGMID_R3TR && !e.key.name.starts_with('/'))
        .cloned()
        .collect()
}

fn same_version(a: &str, b: &str) -> bool {
    match (clean_version(a), clean_version(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}
