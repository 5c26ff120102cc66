//! Dependency discovery and version selection against systems and
//! registries populated by real publish and install runs.

mod common;

use common::{devclass, object, publish, vendor_object};
use std::sync::Arc;
use trm_core::{
    Context, CoreConfig, CoreError, DependencyResolver, EdgeTarget, InstallOptions, InstallSaga,
    Owner, RegistrySet, VersionResolver,
};
use trm_remote::mock::{MemoryRegistry, MemorySystem};
use trm_remote::{RegistryConnector, UsageRecord};
use trm_schema::{
    DependencyDecl, Integrity, LockedPackage, Lockfile, Manifest, ObjectKey, Package, RegistryRef,
    VersionRange,
};

fn uses(system: &MemorySystem, site: (&str, &str), used: &[(&str, &str)]) {
    system.add_usages(
        &ObjectKey::r3tr(site.0, site.1),
        used.iter().map(|(t, n)| UsageRecord::new(t, n)).collect(),
    );
}

#[test]
fn newest_shipped_version_is_declared() {
    let source = MemorySystem::new("DEV");
    let registry = MemoryRegistry::public();
    devclass(&source, "ZCORE", &[("CLAS", "ZCL_CORE")]);
    publish(&source, &registry, "ZCORE", Manifest::new("core", "1.0.0"));
    publish(&source, &registry, "ZCORE", Manifest::new("core", "1.1.0"));

    devclass(&source, "ZEXT", &[("CLAS", "ZCL_EXT")]);
    uses(&source, ("CLAS", "ZCL_EXT"), &[("CLAS", "ZCL_CORE")]);

    let config = CoreConfig::default();
    let ctx = Context::default();
    let report = DependencyResolver::new(&source, &config, &ctx)
        .resolve_devclass("ZEXT", None)
        .unwrap();

    assert_eq!(report.edges.len(), 1);
    match &report.edges[0].target {
        EdgeTarget::Package {
            identity, version, ..
        } => {
            assert_eq!(identity.name, "core");
            assert_eq!(version, "1.1.0");
        }
        other => panic!("unexpected edge {other:?}"),
    }
    let decl = &report.package_dependencies[0];
    assert_eq!(decl.version, "^1.1.0");
    assert_eq!(
        decl.integrity,
        registry.release("core", "1.1.0").unwrap().integrity.to_string()
    );
    assert_eq!(decl.registry, None);
}

#[test]
fn installed_packages_are_recognized_on_the_target() {
    let source = MemorySystem::new("DEV");
    let registry = Arc::new(MemoryRegistry::public());
    devclass(&source, "ZCORE", &[("CLAS", "ZCL_CORE")]);
    publish(&source, &registry, "ZCORE", Manifest::new("core", "1.0.0"));

    let target = MemorySystem::new("QAS");
    let registries = RegistrySet::new().with(registry.clone());
    let config = CoreConfig::default();
    let ctx = Context::default();
    InstallSaga::new(&target, &registries, &config, &ctx)
        .install_range(
            "core",
            &VersionRange::any(),
            &RegistryRef::Public,
            &InstallOptions::default(),
        )
        .unwrap();

    // Local development on the target that builds on the installed package.
    devclass(&target, "ZLOCAL", &[("CLAS", "ZCL_LOCAL")]);
    object(&target, "TABL", "ZLOCAL_TAB", "ZHELPERS");
    vendor_object(&target, "CLAS", "CL_SALV_TABLE", "SALV_OM");
    uses(
        &target,
        ("CLAS", "ZCL_LOCAL"),
        &[
            ("CLAS", "ZCL_CORE"),
            ("TABL", "ZLOCAL_TAB"),
            ("CLAS", "CL_SALV_TABLE"),
        ],
    );

    let report = DependencyResolver::new(&target, &config, &ctx)
        .resolve_devclass("ZLOCAL", None)
        .unwrap();
    assert_eq!(report.edges.len(), 3);
    assert_eq!(report.package_dependencies.len(), 1);
    assert_eq!(report.package_dependencies[0].name, "core");
    assert_eq!(
        report.package_dependencies[0].integrity,
        registry.release("core", "1.0.0").unwrap().integrity.to_string()
    );

    let local: Vec<&EdgeTarget> = report.unresolved(Owner::Local).map(|e| &e.target).collect();
    assert_eq!(
        local,
        vec![&EdgeTarget::Unresolved {
            owner: Owner::Local,
            group: "ZHELPERS".to_owned(),
        }]
    );
    assert_eq!(report.unresolved(Owner::Vendor).count(), 1);
}

#[test]
fn lock_entries_pin_versions_until_the_registry_disagrees() {
    let registry = MemoryRegistry::public();
    registry.add_release("core", "1.0.0", b"core 1.0.0".to_vec());
    let pinned = registry.add_release("core", "1.2.0", b"core 1.2.0".to_vec());
    registry.add_release("core", "2.0.0", b"core 2.0.0".to_vec());
    let range = VersionRange::parse("^1.0.0").unwrap();
    let resolver = VersionResolver::new(&registry);

    let free = resolver.resolve("core", &range, None).unwrap();
    assert_eq!(free.version, "1.2.0");
    assert!(!free.locked);

    let mut lock = Lockfile::for_root("app", "1.0.0");
    lock.insert(LockedPackage {
        name: "core".to_owned(),
        version: "1.0.0".to_owned(),
        registry: RegistryRef::Public,
        integrity: Integrity::of(b"core 1.0.0"),
    });
    let locked = resolver.resolve("core", &range, Some(&lock)).unwrap();
    assert_eq!(locked.version, "1.0.0");
    assert!(locked.locked);

    // A lock entry outside the range is ignored.
    let next = VersionRange::parse("^2.0.0").unwrap();
    assert_eq!(
        resolver.resolve("core", &next, Some(&lock)).unwrap().version,
        "2.0.0"
    );

    registry.report_integrity("core", "1.0.0", pinned);
    let err = resolver.resolve("core", &range, Some(&lock)).unwrap_err();
    assert!(matches!(err, CoreError::Integrity { .. }));

    let err = resolver
        .resolve("core", &VersionRange::parse("^3.0.0").unwrap(), None)
        .unwrap_err();
    assert!(matches!(err, CoreError::ReleaseNotFound { .. }));
    let err = resolver.resolve("ghost", &range, None).unwrap_err();
    assert!(matches!(err, CoreError::ReleaseNotFound { .. }));
}

#[test]
fn dependency_tree_stops_at_cycles() {
    let system = MemorySystem::new("QAS");
    let app = installed(&system, "app", &["core", "ui"]);
    installed(&system, "core", &["util"]);
    installed(&system, "util", &["core"]);

    let config = CoreConfig::default();
    let ctx = Context::default();
    let tree = DependencyResolver::new(&system, &config, &ctx)
        .resolve_tree(&app)
        .unwrap();

    assert_eq!(tree.dependencies.len(), 2);
    let core = &tree.dependencies[0];
    assert!(!core.circular);
    let util = &core.dependencies[0];
    assert_eq!(util.identity.name, "util");
    let again = &util.dependencies[0];
    assert_eq!(again.identity.name, "core");
    assert!(again.circular);
    assert_eq!(again.dependencies.len(), 1);
    assert!(again.dependencies[0].dependencies.is_empty());

    let ui = &tree.dependencies[1];
    assert!(!ui.installed);
    assert_eq!(ui.version, "^1.0.0");
}

fn installed(system: &MemorySystem, name: &str, deps: &[&str]) -> Package {
    let mut manifest = Manifest::new(name, "1.0.0");
    manifest.dependencies = deps
        .iter()
        .map(|d| DependencyDecl {
            name: (*d).to_owned(),
            version: "^1.0.0".to_owned(),
            integrity: String::new(),
            registry: None,
        })
        .collect();
    let package = Package::new(manifest, RegistryRef::Public);
    system.install_package(package.clone());
    package
}
