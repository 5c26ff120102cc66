//! Mapping from the type codes found in usage environments to the
//! transportable object that owns the reference.

use std::collections::HashMap;
use tracing::debug;
use trm_remote::{ObjectRecord, RemoteError, SystemConnector, UsageRecord};
use trm_schema::ObjectKey;

/// Resolves one usage record to the object directory row owning it.
pub type ParseFn =
    fn(&dyn SystemConnector, &UsageRecord) -> Result<Option<ObjectRecord>, RemoteError>;

/// Types whose usage records name a transportable object directly.
const DIRECT_TYPES: &[&str] = &[
    "CLAS", "INTF", "PROG", "FUGR", "TABL", "DTEL", "DOMA", "TTYP", "VIEW", "SHLP", "MSAG",
    "ENQU", "TRAN", "XSLT",
];

/// Dispatch table keyed by type code.
pub struct ObjectParsers {
    table: HashMap<String, ParseFn>,
}

impl Default for ObjectParsers {
    fn default() -> Self {
        let mut parsers = Self::empty();
        for object_type in DIRECT_TYPES {
            parsers.register(object_type, direct);
        }
        parsers.register("FUNC", function_module);
        parsers.register("METH", method);
        parsers.register("STRU", structure);
        parsers
    }
}

impl ObjectParsers {
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Add or replace the parser for `object_type`.
    pub fn register(&mut self, object_type: &str, parse: ParseFn) {
        self.table.insert(object_type.to_uppercase(), parse);
    }

    pub fn supports(&self, object_type: &str) -> bool {
        self.table.contains_key(&object_type.to_uppercase())
    }

    /// `Ok(None)` when the type has no parser or the owner does not exist.
    pub fn parse(
        &self,
        system: &dyn SystemConnector,
        usage: &UsageRecord,
    ) -> Result<Option<ObjectRecord>, RemoteError> {
        match self.table.get(&usage.object_type.to_uppercase()) {
            Some(parse) => parse(system, usage),
            None => {
                debug!("no parser for {} {}", usage.object_type, usage.name);
                Ok(None)
            }
        }
    }
}

fn direct(
    system: &dyn SystemConnector,
    usage: &UsageRecord,
) -> Result<Option<ObjectRecord>, RemoteError> {
    system.get_object(&ObjectKey::r3tr(&usage.object_type, &usage.name))
}

fn function_module(
    system: &dyn SystemConnector,
    usage: &UsageRecord,
) -> Result<Option<ObjectRecord>, RemoteError> {
    match system.function_group(&usage.name)? {
        Some(group) => system.get_object(&ObjectKey::r3tr("FUGR", &group)),
        None => Ok(None),
    }
}

fn method(
    system: &dyn SystemConnector,
    usage: &UsageRecord,
) -> Result<Option<ObjectRecord>, RemoteError> {
    match &usage.enclosing {
        Some(class) => system.get_object(&ObjectKey::r3tr("CLAS", class)),
        None => Ok(None),
    }
}

fn structure(
    system: &dyn SystemConnector,
    usage: &UsageRecord,
) -> Result<Option<ObjectRecord>, RemoteError> {
    system.get_object(&ObjectKey::r3tr("TABL", &usage.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trm_remote::mock::MemorySystem;

    fn system() -> MemorySystem {
        let system = MemorySystem::new("DEV");
        for (object_type, name) in [("CLAS", "ZCL_A"), ("FUGR", "ZFG"), ("TABL", "ZSTRUCT")] {
            system.add_object(ObjectRecord {
                key: ObjectKey::r3tr(object_type, name),
                devclass: "ZPKG".to_owned(),
                src_system: "DEV".to_owned(),
                author: "DEVELOPER".to_owned(),
            });
        }
        system.add_function("Z_FM", "ZFG");
        system
    }

    #[test]
    fn indirect_types_resolve_to_their_owner() {
        let system = system();
        let parsers = ObjectParsers::default();
        let owner = |usage: UsageRecord| parsers.parse(&system, &usage).unwrap().map(|o| o.key);

        assert_eq!(
            owner(UsageRecord::new("clas", "zcl_a")),
            Some(ObjectKey::r3tr("CLAS", "ZCL_A"))
        );
        assert_eq!(
            owner(UsageRecord::new("FUNC", "Z_FM")),
            Some(ObjectKey::r3tr("FUGR", "ZFG"))
        );
        assert_eq!(
            owner(UsageRecord::new("METH", "RUN").within("ZCL_A")),
            Some(ObjectKey::r3tr("CLAS", "ZCL_A"))
        );
        assert_eq!(
            owner(UsageRecord::new("STRU", "ZSTRUCT")),
            Some(ObjectKey::r3tr("TABL", "ZSTRUCT"))
        );
        assert_eq!(owner(UsageRecord::new("METH", "RUN")), None);
        assert_eq!(owner(UsageRecord::new("FUNC", "Z_UNKNOWN")), None);
    }

    #[test]
    fn unknown_types_are_ignored() {
        let parsers = ObjectParsers::default();
        assert!(!parsers.supports("SFSW"));
        assert!(parsers
            .parse(&system(), &UsageRecord::new("SFSW", "X"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn custom_parsers_can_be_registered() {
        fn always_class(
            system: &dyn SystemConnector,
            _usage: &UsageRecord,
        ) -> Result<Option<ObjectRecord>, RemoteError> {
            system.get_object(&ObjectKey::r3tr("CLAS", "ZCL_A"))
        }
        let mut parsers = ObjectParsers::empty();
        parsers.register("sfsw", always_class);
        assert!(parsers.supports("SFSW"));
        assert!(parsers
            .parse(&system(), &UsageRecord::new("SFSW", "X"))
            .unwrap()
            .is_some());
    }
}
