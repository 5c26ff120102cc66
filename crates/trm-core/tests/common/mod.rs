#![allow(dead_code)]

use trm_core::{Context, CoreConfig, PublishOptions, PublishResult, PublishSaga};
use trm_remote::mock::{MemoryRegistry, MemorySystem, Mutation};
use trm_remote::ObjectRecord;
use trm_schema::{Manifest, ObjectKey, TransportId};

pub fn object(system: &MemorySystem, object_type: &str, name: &str, devclass: &str) {
    system.add_object(ObjectRecord {
        key: ObjectKey::r3tr(object_type, name),
        devclass: devclass.to_owned(),
        src_system: system_id(system),
        author: "DEVELOPER".to_owned(),
    });
}

pub fn vendor_object(system: &MemorySystem, object_type: &str, name: &str, devclass: &str) {
    system.add_object(ObjectRecord {
        key: ObjectKey::r3tr(object_type, name),
        devclass: devclass.to_owned(),
        src_system: "SAP".to_owned(),
        author: "SAP".to_owned(),
    });
}

/// A devclass with its package definition and the given objects.
pub fn devclass(system: &MemorySystem, devclass: &str, objects: &[(&str, &str)]) {
    object(system, "DEVC", devclass, devclass);
    for (object_type, name) in objects {
        object(system, object_type, name, devclass);
    }
}

fn system_id(system: &MemorySystem) -> String {
    trm_remote::SystemConnector::system_id(system).to_owned()
}

pub fn publish(
    system: &MemorySystem,
    registry: &MemoryRegistry,
    devclass: &str,
    manifest: Manifest,
) -> PublishResult {
    let config = CoreConfig::default();
    let ctx = Context::default();
    PublishSaga::new(system, registry, &config, &ctx)
        .run(&PublishOptions::new(devclass, manifest))
        .unwrap()
}

pub fn created(mutations: &[Mutation]) -> Vec<TransportId> {
    mutations
        .iter()
        .filter_map(|m| match m {
            Mutation::Created(id, _) => Some(id.clone()),
            _ => None,
        })
        .collect()
}

pub fn matching(mutations: &[Mutation], pick: fn(&Mutation) -> bool) -> Vec<TransportId> {
    mutations
        .iter()
        .filter(|m| pick(m))
        .filter_map(|m| m.transport().cloned())
        .collect()
}
