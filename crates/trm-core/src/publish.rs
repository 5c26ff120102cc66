//! Publishing a devclass as a package release.
//!
//! The saga creates the transports that make up a release on the source
//! system, uploads the bundled artifact, and finally releases the
//! transports. Until the first release every transport created so far is
//! rolled back on failure: deleted, or for the object list, marked as
//! skipped when it can no longer be deleted. Released transports are never
//! touched again.

use crate::config::CoreConfig;
use crate::context::Context;
use crate::dependency::{
    registry_field, DependencyReport, DependencyResolver, EdgeTarget, Owner,
};
use crate::saga::{Saga, SagaStep, StepState};
use crate::CoreError;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info};
use trm_remote::{
    trm_comments, RegistryConnector, ReleaseOptions, RemoteError, SystemConnector, TransportKind,
};
use trm_schema::object::{DEVC, PGMID_R3TR};
use trm_schema::{
    Artifact, Integrity, Manifest, ObjectKey, Package, PackageIdentity, TransportEntry,
    TransportId, TransportPayload, TransportRole,
};

/// Program id of merge bookkeeping rows in customizing transports.
const PGMID_CORR: &str = "CORR";

#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Root devclass of the package; subpackages are included.
    pub devclass: String,
    /// Manifest fields supplied by the publisher. Declared dependencies are
    /// kept ahead of the discovered ones.
    pub manifest: Manifest,
    pub readme: Option<String>,
    /// Ship a translations transport when there is anything to translate.
    pub translations: bool,
    /// Customizing transports whose content ships with the release.
    pub customizing: Vec<TransportId>,
    /// Lock objects on release.
    pub lock: bool,
    pub bypass_check: bool,
}

impl PublishOptions {
    pub fn new(devclass: &str, manifest: Manifest) -> Self {
        Self {
            devclass: devclass.trim().to_uppercase(),
            manifest,
            readme: None,
            translations: true,
            customizing: Vec::new(),
            lock: true,
            bypass_check: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishResult {
    pub manifest: Manifest,
    pub integrity: Integrity,
    /// Released transports in release order.
    pub transports: Vec<(TransportRole, TransportId)>,
    pub dependencies: DependencyReport,
    pub warnings: Vec<String>,
}

/// A transport created by the saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTransport {
    pub role: TransportRole,
    pub id: TransportId,
}

impl fmt::Display for ReleaseTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} transport {}", self.role, self.id)
    }
}

/// A transport that made it into the release, with the entries it ships.
struct Member {
    role: TransportRole,
    step: usize,
    id: TransportId,
    entries: Vec<TransportEntry>,
}

/// Everything computed before the first side effect.
struct Prepared {
    manifest: Manifest,
    identity: PackageIdentity,
    objects: Vec<TransportEntry>,
    definitions: Vec<TransportEntry>,
    report: DependencyReport,
}

struct Failure {
    step: &'static str,
    error: CoreError,
    published: bool,
}

fn at<E: Into<CoreError>>(step: &'static str) -> impl FnOnce(E) -> Failure {
    move |e| Failure {
        step,
        error: e.into(),
        published: false,
    }
}

pub struct PublishSaga<'a> {
    system: &'a dyn SystemConnector,
    registry: &'a dyn RegistryConnector,
    config: &'a CoreConfig,
    ctx: &'a Context,
}

impl<'a> PublishSaga<'a> {
    pub fn new(
        system: &'a dyn SystemConnector,
        registry: &'a dyn RegistryConnector,
        config: &'a CoreConfig,
        ctx: &'a Context,
    ) -> Self {
        Self {
            system,
            registry,
            config,
            ctx,
        }
    }

    pub fn run(&self, options: &PublishOptions) -> Result<PublishResult, CoreError> {
        self.ctx.check_cancelled()?;
        let prepared = self.prepare(options)?;
        self.check_publishable(&prepared.manifest)?;

        let mut saga = Saga::new(format!(
            "publish {}@{}",
            prepared.manifest.name, prepared.manifest.version
        ));
        match self.execute(&mut saga, options, &prepared) {
            Ok((integrity, members)) => {
                info!(
                    "published {}@{} ({integrity})",
                    prepared.manifest.name, prepared.manifest.version
                );
                Ok(PublishResult {
                    transports: members.into_iter().map(|m| (m.role, m.id)).collect(),
                    manifest: prepared.manifest,
                    integrity,
                    dependencies: prepared.report,
                    warnings: self.ctx.take_warnings(),
                })
            }
            Err(failure) => Err(self.fail(&mut saga, &prepared.manifest, failure)),
        }
    }

    /// Collect the package content, discover its dependencies and build the
    /// normalized manifest.
    fn prepare(&self, options: &PublishOptions) -> Result<Prepared, CoreError> {
        let identity = PackageIdentity::new(&options.manifest.name, self.registry.registry())?;

        let records = self.system.devclass_objects(&options.devclass, true)?;
        let mut devclasses = BTreeSet::from([options.devclass.to_uppercase()]);
        let mut objects = Vec::new();
        for record in &records {
            if record.key.is_devclass() {
                devclasses.insert(record.key.name.clone());
            } else {
                devclasses.insert(record.devclass.clone());
                objects.push(TransportEntry::new(
                    record.key.clone(),
                    Some(record.devclass.as_str()),
                ));
            }
        }
        if objects.is_empty() {
            return Err(CoreError::Resolution(format!(
                "devclass {} contains no objects to publish",
                options.devclass
            )));
        }
        let definitions = devclasses
            .iter()
            .map(|d| TransportEntry::new(ObjectKey::new(PGMID_R3TR, DEVC, d), Some(d.as_str())))
            .collect();

        let keys: Vec<ObjectKey> = objects.iter().map(|e| e.key.clone()).collect();
        let report = DependencyResolver::new(self.system, self.config, self.ctx)
            .resolve(&keys, Some(&identity))?;

        let unresolved: Vec<String> = report
            .unresolved(Owner::Local)
            .map(|edge| match &edge.target {
                EdgeTarget::Unresolved { group, .. } => group.clone(),
                EdgeTarget::Package { identity, .. } => identity.to_string(),
            })
            .collect();
        if !unresolved.is_empty() {
            self.ctx.warn(format!(
                "objects from {} are not part of any package",
                unresolved.join(", ")
            ));
            if !self.ctx.confirm("Publish with unresolved dependencies?", true) {
                return Err(CoreError::Cancelled);
            }
        }

        let mut manifest = options.manifest.clone();
        for discovered in &report.package_dependencies {
            let target = self.config.resolve_registry(discovered.registry.as_deref());
            let declared = manifest.dependencies.iter().any(|d| {
                d.name.eq_ignore_ascii_case(&discovered.name)
                    && self.config.resolve_registry(d.registry.as_deref()) == target
            });
            if !declared {
                manifest.dependencies.push(discovered.clone());
            }
        }
        for dependency in &mut manifest.dependencies {
            dependency.registry = registry_field(
                &self.config.resolve_registry(dependency.registry.as_deref()),
            );
        }
        let manifest = manifest.normalize(false)?;

        debug!(
            "{identity}: {} objects, {} devclasses, {} dependencies",
            objects.len(),
            devclasses.len(),
            manifest.dependencies.len()
        );
        Ok(Prepared {
            manifest,
            identity,
            objects,
            definitions,
            report,
        })
    }

    /// The registry only gets a say when it answers: a denial or an existing
    /// release stops the publish, an unavailable check does not.
    fn check_publishable(&self, manifest: &Manifest) -> Result<(), CoreError> {
        match self
            .registry
            .package_exists(&manifest.name, Some(&manifest.version))
        {
            Ok(true) => {
                return Err(CoreError::AlreadyPublished {
                    name: manifest.name.clone(),
                    version: manifest.version.clone(),
                })
            }
            Ok(false) => {}
            Err(e) => self
                .ctx
                .warn(format!("cannot check whether {} exists: {e}", manifest.name)),
        }
        match self.registry.can_publish_releases(&manifest.name) {
            Ok(true) => Ok(()),
            Ok(false) => Err(CoreError::PublishDenied(manifest.name.clone())),
            Err(e) => {
                self.ctx.warn(format!(
                    "cannot check publish rights for {}, assuming allowed: {e}",
                    manifest.name
                ));
                Ok(())
            }
        }
    }

    fn execute(
        &self,
        saga: &mut Saga<ReleaseTransport>,
        options: &PublishOptions,
        prepared: &Prepared,
    ) -> Result<(Integrity, Vec<Member>), Failure> {
        let manifest = &prepared.manifest;
        let mut members = Vec::new();

        const OBJECT_LIST: &str = "create object list transport";
        self.ctx.check_cancelled().map_err(at(OBJECT_LIST))?;
        let id = self
            .system
            .create_transport(TransportKind::Copies, &description(manifest, "objects"))
            .map_err(at(OBJECT_LIST))?;
        let step = saga.record(OBJECT_LIST, transport(TransportRole::ObjectList, &id), true);
        self.tag(&id, &prepared.identity, manifest)
            .map_err(at(OBJECT_LIST))?;
        let documentation = manifest.to_exchange().map_err(at(OBJECT_LIST))?;
        self.system
            .set_documentation(&id, &documentation)
            .map_err(at(OBJECT_LIST))?;
        self.system
            .add_objects(&id, &prepared.objects, options.lock)
            .map_err(at(OBJECT_LIST))?;
        members.push(Member {
            role: TransportRole::ObjectList,
            step,
            id,
            entries: prepared.objects.clone(),
        });

        const DEFINITION: &str = "create package definition transport";
        self.ctx.check_cancelled().map_err(at(DEFINITION))?;
        let id = self
            .system
            .create_transport(TransportKind::Copies, &description(manifest, "devclasses"))
            .map_err(at(DEFINITION))?;
        let step = saga.record(
            DEFINITION,
            transport(TransportRole::PackageDefinition, &id),
            true,
        );
        self.tag(&id, &prepared.identity, manifest)
            .map_err(at(DEFINITION))?;
        self.system
            .add_objects(&id, &prepared.definitions, options.lock)
            .map_err(at(DEFINITION))?;
        members.push(Member {
            role: TransportRole::PackageDefinition,
            step,
            id,
            entries: prepared.definitions.clone(),
        });

        if options.translations {
            const TRANSLATIONS: &str = "create translations transport";
            self.ctx.check_cancelled().map_err(at(TRANSLATIONS))?;
            if let Some(member) = self.translations(saga, prepared) {
                members.push(member);
            }
        }

        if !options.customizing.is_empty() {
            const CUSTOMIZING: &str = "create customizing transport";
            self.ctx.check_cancelled().map_err(at(CUSTOMIZING))?;
            if let Some(member) = self
                .customizing(saga, prepared, &options.customizing)
                .map_err(at(CUSTOMIZING))?
            {
                members.push(member);
            }
        }

        const UPLOAD: &str = "publish artifact";
        self.ctx.check_cancelled().map_err(at(UPLOAD))?;
        let mut artifact = Artifact::new(manifest.clone());
        for member in &members {
            let data = self
                .system
                .export_transport(&member.id)
                .map_err(at(UPLOAD))?;
            artifact.transports.push(TransportPayload {
                role: member.role,
                transport: member.id.clone(),
                entries: member.entries.clone(),
                data,
            });
        }
        let packed = artifact.pack().map_err(at(UPLOAD))?;
        let integrity = Artifact::integrity(&packed);
        self.registry
            .publish_artifact(
                &manifest.name,
                &manifest.version,
                &packed,
                options.readme.as_deref(),
            )
            .map_err(|e| match e {
                RemoteError::Denied(_) => CoreError::PublishDenied(manifest.name.clone()),
                other => other.into(),
            })
            .map_err(at(UPLOAD))?;
        debug!("uploaded {} bytes as {integrity}", packed.len());

        let release = ReleaseOptions {
            lock: options.lock,
            bypass_check: options.bypass_check,
            tmp_dir: self.config.tmp_dir.clone(),
            timeout: self.config.release_timeout(),
        };
        members.sort_by_key(|m| {
            TransportRole::APPLY_ORDER
                .iter()
                .position(|r| *r == m.role)
                .unwrap_or(usize::MAX)
        });
        for member in &members {
            self.system
                .release_transport(&member.id, &release)
                .map_err(|e| Failure {
                    step: "release transports",
                    error: e.into(),
                    published: true,
                })?;
            saga.mark_released(member.step);
            info!("released {} transport {}", member.role, member.id);
        }

        let package = Package {
            manifest: manifest.clone(),
            registry: prepared.identity.registry.clone(),
            integrity: Some(integrity.clone()),
        };
        if let Err(e) = self.system.register_installed(&package) {
            self.ctx.warn(format!(
                "cannot record {} as published on {}: {e}",
                prepared.identity,
                self.system.system_id()
            ));
        }
        Ok((integrity, members))
    }

    fn tag(
        &self,
        id: &TransportId,
        identity: &PackageIdentity,
        manifest: &Manifest,
    ) -> Result<(), RemoteError> {
        for comment in trm_comments(&manifest.name, &manifest.version, &identity.registry) {
            self.system.add_comment(id, &comment)?;
        }
        Ok(())
    }

    /// Translations are optional: any failure is a warning and the release
    /// goes on without them.
    fn translations(
        &self,
        saga: &mut Saga<ReleaseTransport>,
        prepared: &Prepared,
    ) -> Option<Member> {
        const STEP: &str = "create translations transport";
        let id = match self.system.create_transport(
            TransportKind::Copies,
            &description(&prepared.manifest, "translations"),
        ) {
            Ok(id) => id,
            Err(e) => {
                self.ctx
                    .warn(format!("publishing without translations: {e}"));
                return None;
            }
        };
        let step = saga.record(STEP, transport(TransportRole::Translations, &id), true);
        let filled = self
            .tag(&id, &prepared.identity, &prepared.manifest)
            .and_then(|()| self.system.add_translations(&id, &prepared.objects))
            .and_then(|()| self.system.transport_objects(&id));
        match filled {
            Ok(entries) if !entries.is_empty() => Some(Member {
                role: TransportRole::Translations,
                step,
                id,
                entries,
            }),
            Ok(_) => {
                debug!("nothing to translate");
                self.discard(saga, step, &id);
                None
            }
            Err(e) => {
                self.ctx
                    .warn(format!("publishing without translations: {e}"));
                self.discard(saga, step, &id);
                None
            }
        }
    }

    fn customizing(
        &self,
        saga: &mut Saga<ReleaseTransport>,
        prepared: &Prepared,
        sources: &[TransportId],
    ) -> Result<Option<Member>, CoreError> {
        let id = self.system.create_transport(
            TransportKind::Customizing,
            &description(&prepared.manifest, "customizing"),
        )?;
        let step = saga.record(
            "create customizing transport",
            transport(TransportRole::Customizing, &id),
            true,
        );
        self.tag(&id, &prepared.identity, &prepared.manifest)?;
        self.system.add_customizing(&id, sources)?;
        let entries: Vec<TransportEntry> = self
            .system
            .transport_objects(&id)?
            .into_iter()
            .filter(|e| e.key.pgmid != PGMID_CORR)
            .collect();
        if entries.is_empty() {
            debug!("customizing transports carry no content");
            self.discard(saga, step, &id);
            return Ok(None);
        }
        let disallowed: BTreeSet<&str> = entries
            .iter()
            .filter(|e| !self.config.is_customizing_type(&e.key.object_type))
            .map(|e| e.key.object_type.as_str())
            .collect();
        if !disallowed.is_empty() {
            return Err(CoreError::UnsupportedContent(format!(
                "customizing transports contain object types {}",
                disallowed.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }
        Ok(Some(Member {
            role: TransportRole::Customizing,
            step,
            id,
            entries,
        }))
    }

    /// Drop a transport that turned out to be empty, skipping it when it
    /// cannot be deleted.
    fn discard(&self, saga: &mut Saga<ReleaseTransport>, step: usize, id: &TransportId) {
        let deleted = match self.system.delete_transport(id) {
            Ok(()) => {
                saga.mark_compensated(step);
                return;
            }
            Err(e) => e,
        };
        match self.system.skip_transport(id) {
            Ok(()) => {
                debug!("skipped {id}: {deleted}");
                saga.mark_skipped(step);
            }
            Err(e) => self.ctx.warn(format!(
                "cannot delete empty transport {id} ({deleted}) nor skip it: {e}"
            )),
        }
    }

    fn undo(&self, step: &SagaStep<ReleaseTransport>) -> Result<StepState, CoreError> {
        let id = &step.resource.id;
        let deleted = match self.system.can_be_deleted(id) {
            Ok(true) => self.system.delete_transport(id).map(|()| true),
            Ok(false) => Ok(false),
            Err(e) => Err(e),
        };
        match deleted {
            Ok(true) => Ok(StepState::Compensated),
            _ if step.resource.role == TransportRole::ObjectList => {
                self.system.skip_transport(id)?;
                Ok(StepState::Skipped)
            }
            Ok(false) => {
                Err(RemoteError::Remote(format!("transport {id} cannot be deleted")).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn fail(
        &self,
        saga: &mut Saga<ReleaseTransport>,
        manifest: &Manifest,
        failure: Failure,
    ) -> CoreError {
        if saga.has_released() {
            self.ctx.warn(format!(
                "{} failed after transports were released; {}@{} is partially published",
                failure.step, manifest.name, manifest.version
            ));
            return CoreError::step(failure.step, failure.error, true);
        }

        let leftovers = saga.compensate(|step| self.undo(step));
        for (step, e) in &leftovers {
            self.ctx.warn(format!("{step} was not rolled back: {e}"));
        }
        if failure.published {
            self.ctx.warn(format!(
                "{}@{} is already in the registry and must be removed by hand",
                manifest.name, manifest.version
            ));
        }
        CoreError::step(
            failure.step,
            failure.error,
            failure.published || !leftovers.is_empty(),
        )
    }
}

fn transport(role: TransportRole, id: &TransportId) -> ReleaseTransport {
    ReleaseTransport {
        role,
        id: id.clone(),
    }
}

fn description(manifest: &Manifest, part: &str) -> String {
    format!("trm {}@{} {part}", manifest.name, manifest.version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trm_remote::mock::{MemoryRegistry, MemorySystem, Mutation, Operation};
    use trm_remote::{ObjectRecord, TransportStatus};

    fn system() -> MemorySystem {
        let system = MemorySystem::new("DEV");
        for (object_type, name, devclass) in [
            ("DEVC", "ZAPP", "ZAPP"),
            ("CLAS", "ZCL_APP", "ZAPP"),
            ("PROG", "ZAPP_RUN", "ZAPP"),
        ] {
            system.add_object(ObjectRecord {
                key: ObjectKey::r3tr(object_type, name),
                devclass: devclass.to_owned(),
                src_system: "DEV".to_owned(),
                author: "DEVELOPER".to_owned(),
            });
        }
        system
    }

    fn options() -> PublishOptions {
        PublishOptions::new("zapp", Manifest::new("App", "v1.0.0"))
    }

    #[test]
    fn publishes_and_releases_in_order() {
        let system = system();
        system.mark_translated(&ObjectKey::r3tr("CLAS", "ZCL_APP"));
        let registry = MemoryRegistry::public();
        let config = CoreConfig::default();
        let ctx = Context::default();

        let result = PublishSaga::new(&system, &registry, &config, &ctx)
            .run(&options())
            .unwrap();

        assert_eq!(result.manifest.name, "app");
        assert_eq!(result.manifest.version, "1.0.0");
        let roles: Vec<TransportRole> = result.transports.iter().map(|(r, _)| *r).collect();
        assert_eq!(
            roles,
            vec![
                TransportRole::ObjectList,
                TransportRole::Translations,
                TransportRole::PackageDefinition
            ]
        );
        for (_, id) in &result.transports {
            let stored = system.stored_transport(id).unwrap();
            assert_eq!(stored.record.status, TransportStatus::Released);
            assert_eq!(stored.record.trm_tag().unwrap().name, "app");
        }
        let (_, objects) = &result.transports[0];
        assert!(system
            .stored_transport(objects)
            .unwrap()
            .documentation
            .unwrap()
            .contains("\"app\""));
        assert_eq!(registry.published(), vec![("app".to_owned(), "1.0.0".to_owned())]);
        assert_eq!(
            registry.release("app", "1.0.0").unwrap().integrity,
            result.integrity
        );
    }

    #[test]
    fn empty_translations_are_discarded() {
        let system = system();
        let registry = MemoryRegistry::public();
        let config = CoreConfig::default();
        let ctx = Context::default();
        let result = PublishSaga::new(&system, &registry, &config, &ctx)
            .run(&options())
            .unwrap();
        assert_eq!(result.transports.len(), 2);
        let deleted = system
            .mutations()
            .iter()
            .filter(|m| matches!(m, Mutation::Deleted(_)))
            .count();
        assert_eq!(deleted, 1);
    }

    #[test]
    fn undeletable_empty_transport_is_skipped() {
        let system = system();
        system.fail_on(Operation::Delete, 1);
        let registry = MemoryRegistry::public();
        let config = CoreConfig::default();
        let ctx = Context::default();
        let result = PublishSaga::new(&system, &registry, &config, &ctx)
            .run(&options())
            .unwrap();
        assert_eq!(result.transports.len(), 2);
        let mutations = system.mutations();
        let skipped: Vec<&TransportId> = mutations
            .iter()
            .filter_map(|m| match m {
                Mutation::Skipped(id) => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(skipped.len(), 1);
        assert!(result.transports.iter().all(|(_, id)| id != skipped[0]));
        assert!(!mutations.iter().any(|m| matches!(m, Mutation::Deleted(_))));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn translation_errors_only_warn() {
        let system = system();
        system.fail_on(Operation::AddTranslations, 1);
        let registry = MemoryRegistry::public();
        let config = CoreConfig::default();
        let ctx = Context::default();
        let result = PublishSaga::new(&system, &registry, &config, &ctx)
            .run(&options())
            .unwrap();
        assert_eq!(result.transports.len(), 2);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("without translations")));
    }

    #[test]
    fn existing_release_stops_before_any_side_effect() {
        let system = system();
        let registry = MemoryRegistry::public();
        registry.add_release("app", "1.0.0", b"old".to_vec());
        let config = CoreConfig::default();
        let ctx = Context::default();
        let err = PublishSaga::new(&system, &registry, &config, &ctx)
            .run(&options())
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyPublished { .. }));
        assert!(system.mutations().is_empty());
    }

    #[test]
    fn denial_is_fatal_but_unavailable_check_is_not() {
        let system = system();
        let registry = MemoryRegistry::public();
        registry.deny("app");
        let config = CoreConfig::default();
        let ctx = Context::default();
        let err = PublishSaga::new(&system, &registry, &config, &ctx)
            .run(&options())
            .unwrap_err();
        assert!(matches!(err, CoreError::PublishDenied(_)));

        let registry = MemoryRegistry::public();
        registry.set_checks_unavailable(true);
        let result = PublishSaga::new(&system, &registry, &config, &ctx)
            .run(&options())
            .unwrap();
        assert!(result.warnings.iter().any(|w| w.contains("assuming allowed")));
    }

    #[test]
    fn customizing_is_filtered_and_checked() {
        let system = system();
        let source = system.seed_transport(
            TransportKind::Customizing,
            vec![
                TransportEntry::new(ObjectKey::new("R3TR", "TABU", "ZCONFIG"), None),
                TransportEntry::new(ObjectKey::new("CORR", "MERG", "DEVK900099"), None),
            ],
            Vec::new(),
            false,
        );
        let registry = MemoryRegistry::public();
        let config = CoreConfig::default();
        let ctx = Context::default();
        let mut opts = options();
        opts.customizing = vec![source];
        let result = PublishSaga::new(&system, &registry, &config, &ctx)
            .run(&opts)
            .unwrap();
        let (role, id) = &result.transports[1];
        assert_eq!(*role, TransportRole::Customizing);
        assert_eq!(
            system.stored_transport(id).unwrap().record.status,
            TransportStatus::Released
        );
    }

    #[test]
    fn disallowed_customizing_rolls_back() {
        let system = system();
        let source = system.seed_transport(
            TransportKind::Customizing,
            vec![TransportEntry::new(ObjectKey::r3tr("PROG", "ZEVIL"), None)],
            Vec::new(),
            false,
        );
        let registry = MemoryRegistry::public();
        let config = CoreConfig::default();
        let ctx = Context::default();
        let mut opts = options();
        opts.customizing = vec![source];
        let err = PublishSaga::new(&system, &registry, &config, &ctx)
            .run(&opts)
            .unwrap_err();
        match err {
            CoreError::SagaStep { source, manual_cleanup, .. } => {
                assert!(matches!(*source, CoreError::UnsupportedContent(_)));
                assert!(!manual_cleanup);
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(system
            .modifiable_transports()
            .unwrap()
            .iter()
            .all(|t| t.trm_tag().is_none()));
        assert!(registry.published().is_empty());
    }

    #[test]
    fn declined_unresolved_dependencies_cancel() {
        let system = system();
        system.add_object(ObjectRecord {
            key: ObjectKey::r3tr("CLAS", "ZCL_UTIL"),
            devclass: "ZUTIL".to_owned(),
            src_system: "DEV".to_owned(),
            author: "DEVELOPER".to_owned(),
        });
        system.add_usages(
            &ObjectKey::r3tr("CLAS", "ZCL_APP"),
            vec![trm_remote::UsageRecord::new("CLAS", "ZCL_UTIL")],
        );
        let registry = MemoryRegistry::public();
        let config = CoreConfig::default();
        let ctx = Context::new(Box::new(crate::context::FixedAnswer(false)));
        let err = PublishSaga::new(&system, &registry, &config, &ctx)
            .run(&options())
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
        assert!(system.mutations().is_empty());
    }
}
