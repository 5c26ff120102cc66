//! In-memory connectors.
//!
//! [`MemorySystem`] and [`MemoryRegistry`] keep all state behind a mutex and
//! record every side effect, so tests can assert on exactly what a workflow did
//! to the system. Faults are injected per operation with [`MemorySystem::fail_on`]
//! and [`MemorySystem::time_out_on`].

use crate::registry::{PackageInfo, RegistryConnector, Release};
use crate::system::{
    ObjectRecord, ReleaseOptions, SystemConnector, TransportKind, TransportRecord,
    TransportStatus, UsageRecord,
};
use crate::RemoteError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;
use trm_schema::{
    clean_version, Integrity, ObjectKey, Package, PackageIdentity, RegistryRef, SapEntry,
    TransportEntry, TransportId, TransportPayload, VersionRange,
};

const CLOCK_START: i64 = 1_700_000_000;

/// Object types a fresh [`MemorySystem`] accepts on import.
pub const DEFAULT_OBJECT_TYPES: &[&str] = &[
    "CLAS", "DEVC", "DOMA", "DTEL", "ENQU", "FUGR", "INTF", "MSAG", "PROG", "SHLP", "TABL",
    "TRAN", "TTYP", "VIEW", "XSLT",
];

/// Operations of [`MemorySystem`] that faults can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetObject,
    ObjectTransports,
    InstalledPackages,
    PackageIntegrity,
    RegisterInstalled,
    CreateTransport,
    AddObjects,
    AddComment,
    SetDocumentation,
    AddTranslations,
    AddCustomizing,
    Export,
    Release,
    Delete,
    Skip,
    Import,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Error,
    Timeout,
}

/// A side effect observed on a [`MemorySystem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Created(TransportId, TransportKind),
    ObjectsAdded(TransportId),
    Annotated(TransportId),
    Released(TransportId),
    Deleted(TransportId),
    Skipped(TransportId),
    Imported(TransportId),
    Registered(PackageIdentity),
}

impl Mutation {
    pub fn transport(&self) -> Option<&TransportId> {
        match self {
            Self::Created(id, _)
            | Self::ObjectsAdded(id)
            | Self::Annotated(id)
            | Self::Released(id)
            | Self::Deleted(id)
            | Self::Skipped(id)
            | Self::Imported(id) => Some(id),
            Self::Registered(_) => None,
        }
    }
}

/// A transport as the memory system stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTransport {
    pub record: TransportRecord,
    pub entries: Vec<TransportEntry>,
    pub documentation: Option<String>,
    pub skipped: bool,
    /// Objects of this transport were picked up elsewhere; it can no longer be deleted.
    pub in_use: bool,
}

/// Export format of the memory system.
#[derive(Serialize, Deserialize)]
struct ExportedTransport {
    record: TransportRecord,
    entries: Vec<TransportEntry>,
    documentation: Option<String>,
}

struct SystemState {
    clock: i64,
    next_transport: u32,
    objects: BTreeMap<ObjectKey, ObjectRecord>,
    usages: HashMap<ObjectKey, Vec<UsageRecord>>,
    function_groups: HashMap<String, String>,
    subpackages: BTreeMap<String, Vec<String>>,
    transports: BTreeMap<TransportId, StoredTransport>,
    installed: Vec<Package>,
    table_entries: BTreeMap<String, Vec<SapEntry>>,
    supported_types: BTreeSet<String>,
    translated: HashSet<ObjectKey>,
    unreadable: HashSet<ObjectKey>,
    faults: Vec<(Operation, usize, Fault)>,
    calls: HashMap<Operation, usize>,
    mutations: Vec<Mutation>,
}

impl SystemState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        DateTime::from_timestamp(self.clock, 0).unwrap_or_default()
    }

    /// Count a call to `op` and fail it if a fault was injected for this call.
    fn enter(&mut self, op: Operation, timeout: Duration) -> Result<(), RemoteError> {
        let n = self.calls.entry(op).or_insert(0);
        *n += 1;
        let n = *n;
        match self
            .faults
            .iter()
            .find(|(o, nth, _)| *o == op && *nth == n)
            .map(|(_, _, fault)| *fault)
        {
            Some(Fault::Error) => Err(RemoteError::Remote(format!(
                "injected failure in {op:?} (call {n})"
            ))),
            Some(Fault::Timeout) => Err(RemoteError::Timeout {
                operation: format!("{op:?}"),
                after: timeout,
            }),
            None => Ok(()),
        }
    }

    fn stored(&self, id: &TransportId) -> Result<&StoredTransport, RemoteError> {
        self.transports
            .get(id)
            .ok_or_else(|| RemoteError::NotFound(format!("transport {id}")))
    }

    fn modifiable(&mut self, id: &TransportId) -> Result<&mut StoredTransport, RemoteError> {
        let stored = self
            .transports
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(format!("transport {id}")))?;
        if stored.record.is_released() {
            return Err(RemoteError::Remote(format!("transport {id} is released")));
        }
        Ok(stored)
    }

    fn collect_devclasses(&self, devclass: &str, out: &mut BTreeSet<String>) {
        if !out.insert(devclass.to_owned()) {
            return;
        }
        for child in self.subpackages.get(devclass).into_iter().flatten() {
            self.collect_devclasses(child, out);
        }
    }
}

/// An in-memory transport system.
pub struct MemorySystem {
    system_id: String,
    state: Mutex<SystemState>,
}

impl MemorySystem {
    pub fn new(system_id: &str) -> Self {
        Self {
            system_id: system_id.to_uppercase(),
            state: Mutex::new(SystemState {
                clock: CLOCK_START,
                next_transport: 0,
                objects: BTreeMap::new(),
                usages: HashMap::new(),
                function_groups: HashMap::new(),
                subpackages: BTreeMap::new(),
                transports: BTreeMap::new(),
                installed: Vec::new(),
                table_entries: BTreeMap::new(),
                supported_types: DEFAULT_OBJECT_TYPES
                    .iter()
                    .map(|t| (*t).to_owned())
                    .collect(),
                translated: HashSet::new(),
                unreadable: HashSet::new(),
                faults: Vec::new(),
                calls: HashMap::new(),
                mutations: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SystemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Fixture setup. None of these count as mutations.

    pub fn add_object(&self, record: ObjectRecord) {
        self.lock().objects.insert(record.key.clone(), record);
    }

    pub fn add_usages(&self, key: &ObjectKey, usages: Vec<UsageRecord>) {
        self.lock().usages.insert(key.clone(), usages);
    }

    pub fn add_function(&self, function: &str, group: &str) {
        self.lock()
            .function_groups
            .insert(function.to_uppercase(), group.to_uppercase());
    }

    pub fn add_subpackage(&self, parent: &str, child: &str) {
        self.lock()
            .subpackages
            .entry(parent.to_uppercase())
            .or_default()
            .push(child.to_uppercase());
    }

    /// Add a transport that already exists on the system.
    pub fn seed_transport(
        &self,
        kind: TransportKind,
        entries: Vec<TransportEntry>,
        comments: Vec<String>,
        released: bool,
    ) -> TransportId {
        let mut state = self.lock();
        state.next_transport += 1;
        let id = TransportId::new(format!("{}K9{:05}", self.system_id, state.next_transport));
        let created_at = state.tick();
        let record = TransportRecord {
            id: id.clone(),
            kind,
            status: if released {
                TransportStatus::Released
            } else {
                TransportStatus::Modifiable
            },
            description: String::new(),
            comments,
            created_at,
            released_at: released.then_some(created_at),
        };
        state.transports.insert(
            id.clone(),
            StoredTransport {
                record,
                entries,
                documentation: None,
                skipped: false,
                in_use: false,
            },
        );
        id
    }

    pub fn install_package(&self, package: Package) {
        self.lock().installed.push(package);
    }

    pub fn add_table_entry(&self, table: &str, entry: SapEntry) {
        self.lock()
            .table_entries
            .entry(table.to_uppercase())
            .or_default()
            .push(entry);
    }

    pub fn set_supported_types(&self, types: &[&str]) {
        self.lock().supported_types = types.iter().map(|t| t.to_uppercase()).collect();
    }

    /// Objects with translations get a `LANG` entry from [`SystemConnector::add_translations`].
    pub fn mark_translated(&self, key: &ObjectKey) {
        self.lock().translated.insert(key.clone());
    }

    /// Reading the transport history of `key` fails.
    pub fn mark_unreadable(&self, key: &ObjectKey) {
        self.lock().unreadable.insert(key.clone());
    }

    /// Make `id` undeletable.
    pub fn mark_in_use(&self, id: &TransportId) {
        if let Some(stored) = self.lock().transports.get_mut(id) {
            stored.in_use = true;
        }
    }

    /// Fail the `nth` call (1-based) of `op` with a remote error.
    pub fn fail_on(&self, op: Operation, nth: usize) {
        self.lock().faults.push((op, nth, Fault::Error));
    }

    /// Fail the `nth` call (1-based) of `op` with a timeout.
    pub fn time_out_on(&self, op: Operation, nth: usize) {
        self.lock().faults.push((op, nth, Fault::Timeout));
    }

    // Inspection.

    pub fn mutations(&self) -> Vec<Mutation> {
        self.lock().mutations.clone()
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn stored_transport(&self, id: &TransportId) -> Option<StoredTransport> {
        self.lock().transports.get(id).cloned()
    }
}

impl SystemConnector for MemorySystem {
    fn system_id(&self) -> &str {
        &self.system_id
    }

    fn get_object(&self, key: &ObjectKey) -> Result<Option<ObjectRecord>, RemoteError> {
        let mut state = self.lock();
        state.enter(Operation::GetObject, Duration::ZERO)?;
        Ok(state.objects.get(key).cloned())
    }

    fn devclass_objects(
        &self,
        devclass: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectRecord>, RemoteError> {
        let state = self.lock();
        let devclass = devclass.to_uppercase();
        let mut devclasses = BTreeSet::new();
        if recursive {
            state.collect_devclasses(&devclass, &mut devclasses);
        } else {
            devclasses.insert(devclass);
        }
        Ok(state
            .objects
            .values()
            .filter(|o| devclasses.contains(&o.devclass))
            .cloned()
            .collect())
    }

    fn repository_environment(&self, key: &ObjectKey) -> Result<Vec<UsageRecord>, RemoteError> {
        Ok(self.lock().usages.get(key).cloned().unwrap_or_default())
    }

    fn function_group(&self, function: &str) -> Result<Option<String>, RemoteError> {
        Ok(self
            .lock()
            .function_groups
            .get(&function.to_uppercase())
            .cloned())
    }

    fn object_transports(&self, key: &ObjectKey) -> Result<Vec<TransportRecord>, RemoteError> {
        let mut state = self.lock();
        state.enter(Operation::ObjectTransports, Duration::ZERO)?;
        if state.unreadable.contains(key) {
            return Err(RemoteError::Remote(format!(
                "cannot read transport history of {key}"
            )));
        }
        Ok(state
            .transports
            .values()
            .filter(|t| t.entries.iter().any(|e| &e.key == key))
            .map(|t| t.record.clone())
            .collect())
    }

    fn installed_packages(&self) -> Result<Vec<Package>, RemoteError> {
        let mut state = self.lock();
        state.enter(Operation::InstalledPackages, Duration::ZERO)?;
        Ok(state.installed.clone())
    }

    fn package_integrity(&self, identity: &PackageIdentity) -> Result<Integrity, RemoteError> {
        let mut state = self.lock();
        state.enter(Operation::PackageIntegrity, Duration::ZERO)?;
        state
            .installed
            .iter()
            .find(|p| &p.identity() == identity)
            .and_then(|p| p.integrity.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("integrity of {identity}")))
    }

    fn register_installed(&self, package: &Package) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.enter(Operation::RegisterInstalled, Duration::ZERO)?;
        let identity = package.identity();
        state.installed.retain(|p| p.identity() != identity);
        state.installed.push(package.clone());
        state.mutations.push(Mutation::Registered(identity));
        Ok(())
    }

    fn check_entry_exists(&self, table: &str, entry: &SapEntry) -> Result<bool, RemoteError> {
        let state = self.lock();
        Ok(state
            .table_entries
            .get(&table.to_uppercase())
            .is_some_and(|rows| {
                rows.iter()
                    .any(|row| entry.fields().all(|(f, v)| row.get(f) == Some(v)))
            }))
    }

    fn supported_object_types(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self.lock().supported_types.iter().cloned().collect())
    }

    fn create_transport(
        &self,
        kind: TransportKind,
        description: &str,
    ) -> Result<TransportId, RemoteError> {
        let mut state = self.lock();
        state.enter(Operation::CreateTransport, Duration::ZERO)?;
        state.next_transport += 1;
        let id = TransportId::new(format!("{}K9{:05}", self.system_id, state.next_transport));
        let created_at = state.tick();
        state.transports.insert(
            id.clone(),
            StoredTransport {
                record: TransportRecord {
                    id: id.clone(),
                    kind,
                    status: TransportStatus::Modifiable,
                    description: description.to_owned(),
                    comments: Vec::new(),
                    created_at,
                    released_at: None,
                },
                entries: Vec::new(),
                documentation: None,
                skipped: false,
                in_use: false,
            },
        );
        state.mutations.push(Mutation::Created(id.clone(), kind));
        debug!("created transport {id}");
        Ok(id)
    }

    fn transport(&self, id: &TransportId) -> Result<TransportRecord, RemoteError> {
        Ok(self.lock().stored(id)?.record.clone())
    }

    fn transport_objects(&self, id: &TransportId) -> Result<Vec<TransportEntry>, RemoteError> {
        Ok(self.lock().stored(id)?.entries.clone())
    }

    fn modifiable_transports(&self) -> Result<Vec<TransportRecord>, RemoteError> {
        Ok(self
            .lock()
            .transports
            .values()
            .filter(|t| !t.record.is_released() && !t.skipped)
            .map(|t| t.record.clone())
            .collect())
    }

    fn add_objects(
        &self,
        id: &TransportId,
        entries: &[TransportEntry],
        _lock: bool,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.enter(Operation::AddObjects, Duration::ZERO)?;
        let stored = state.modifiable(id)?;
        for entry in entries {
            if !stored.entries.contains(entry) {
                stored.entries.push(entry.clone());
            }
        }
        state.mutations.push(Mutation::ObjectsAdded(id.clone()));
        Ok(())
    }

    fn add_comment(&self, id: &TransportId, comment: &str) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.enter(Operation::AddComment, Duration::ZERO)?;
        state.modifiable(id)?.record.comments.push(comment.to_owned());
        state.mutations.push(Mutation::Annotated(id.clone()));
        Ok(())
    }

    fn set_documentation(&self, id: &TransportId, text: &str) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.enter(Operation::SetDocumentation, Duration::ZERO)?;
        state.modifiable(id)?.documentation = Some(text.to_owned());
        state.mutations.push(Mutation::Annotated(id.clone()));
        Ok(())
    }

    fn add_translations(
        &self,
        id: &TransportId,
        entries: &[TransportEntry],
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.enter(Operation::AddTranslations, Duration::ZERO)?;
        let lang: Vec<TransportEntry> = entries
            .iter()
            .filter(|e| state.translated.contains(&e.key))
            .map(|e| {
                TransportEntry::new(
                    ObjectKey::new("LANG", &e.key.object_type, &e.key.name),
                    e.devclass.as_deref(),
                )
            })
            .collect();
        if lang.is_empty() {
            state.modifiable(id)?;
            return Ok(());
        }
        state.modifiable(id)?.entries.extend(lang);
        state.mutations.push(Mutation::ObjectsAdded(id.clone()));
        Ok(())
    }

    fn add_customizing(
        &self,
        id: &TransportId,
        sources: &[TransportId],
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.enter(Operation::AddCustomizing, Duration::ZERO)?;
        let mut merged = Vec::new();
        for source in sources {
            merged.extend(state.stored(source)?.entries.iter().cloned());
        }
        state.modifiable(id)?.entries.extend(merged);
        state.mutations.push(Mutation::ObjectsAdded(id.clone()));
        Ok(())
    }

    fn export_transport(&self, id: &TransportId) -> Result<Vec<u8>, RemoteError> {
        let mut state = self.lock();
        state.enter(Operation::Export, Duration::ZERO)?;
        let stored = state.stored(id)?;
        serde_json::to_vec(&ExportedTransport {
            record: stored.record.clone(),
            entries: stored.entries.clone(),
            documentation: stored.documentation.clone(),
        })
        .map_err(|e| RemoteError::Serialization(e.to_string()))
    }

    fn release_transport(
        &self,
        id: &TransportId,
        options: &ReleaseOptions,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.enter(Operation::Release, options.timeout)?;
        let released_at = state.tick();
        let stored = state.modifiable(id)?;
        stored.record.status = TransportStatus::Released;
        stored.record.released_at = Some(released_at);
        state.mutations.push(Mutation::Released(id.clone()));
        debug!("released transport {id}");
        Ok(())
    }

    fn can_be_deleted(&self, id: &TransportId) -> Result<bool, RemoteError> {
        let state = self.lock();
        let stored = state.stored(id)?;
        Ok(!stored.record.is_released() && !stored.in_use)
    }

    fn delete_transport(&self, id: &TransportId) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.enter(Operation::Delete, Duration::ZERO)?;
        let stored = state.stored(id)?;
        if stored.record.is_released() || stored.in_use {
            return Err(RemoteError::Remote(format!(
                "transport {id} cannot be deleted"
            )));
        }
        state.transports.remove(id);
        state.mutations.push(Mutation::Deleted(id.clone()));
        debug!("deleted transport {id}");
        Ok(())
    }

    fn skip_transport(&self, id: &TransportId) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.enter(Operation::Skip, Duration::ZERO)?;
        state
            .transports
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(format!("transport {id}")))?
            .skipped = true;
        state.mutations.push(Mutation::Skipped(id.clone()));
        Ok(())
    }

    fn import_transport(
        &self,
        payload: &TransportPayload,
        timeout: Duration,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.enter(Operation::Import, timeout)?;
        let exported: ExportedTransport = serde_json::from_slice(&payload.data)
            .map_err(|e| RemoteError::Serialization(format!("unreadable transport data: {e}")))?;
        let source_system = payload
            .transport
            .as_str()
            .split_once('K')
            .map_or_else(String::new, |(sid, _)| sid.to_owned());

        for entry in &payload.entries {
            if entry.key.pgmid != trm_schema::object::PGMID_R3TR {
                continue;
            }
            state.objects.insert(
                entry.key.clone(),
                ObjectRecord {
                    key: entry.key.clone(),
                    devclass: entry.devclass.clone().unwrap_or_default(),
                    src_system: source_system.clone(),
                    author: String::new(),
                },
            );
        }

        let released_at = state.tick();
        let mut record = exported.record;
        record.status = TransportStatus::Released;
        record.released_at = Some(released_at);
        state.transports.insert(
            payload.transport.clone(),
            StoredTransport {
                record,
                entries: payload.entries.clone(),
                documentation: exported.documentation,
                skipped: false,
                in_use: false,
            },
        );
        state
            .mutations
            .push(Mutation::Imported(payload.transport.clone()));
        debug!("imported transport {} ({})", payload.transport, payload.role);
        Ok(())
    }
}

struct StoredRelease {
    release: Release,
    artifact: Vec<u8>,
}

struct RegistryState {
    clock: i64,
    packages: BTreeMap<String, BTreeMap<String, StoredRelease>>,
    denied: HashSet<String>,
    checks_unavailable: bool,
    published: Vec<(String, String)>,
}

/// An in-memory package registry.
pub struct MemoryRegistry {
    registry: RegistryRef,
    state: Mutex<RegistryState>,
}

impl MemoryRegistry {
    pub fn new(registry: RegistryRef) -> Self {
        Self {
            registry,
            state: Mutex::new(RegistryState {
                clock: CLOCK_START,
                packages: BTreeMap::new(),
                denied: HashSet::new(),
                checks_unavailable: false,
                published: Vec::new(),
            }),
        }
    }

    pub fn public() -> Self {
        Self::new(RegistryRef::Public)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a release directly, bypassing publish checks. Returns its integrity.
    pub fn add_release(&self, name: &str, version: &str, artifact: Vec<u8>) -> Integrity {
        let integrity = Integrity::of(&artifact);
        let mut state = self.lock();
        state.clock += 1;
        let release = Release {
            version: version.to_owned(),
            integrity: integrity.clone(),
            published_at: DateTime::from_timestamp(state.clock, 0).unwrap_or_default(),
            readme: None,
        };
        state
            .packages
            .entry(name.to_owned())
            .or_default()
            .insert(version.to_owned(), StoredRelease { release, artifact });
        integrity
    }

    /// Make the registry report `integrity` for a release regardless of its content.
    pub fn report_integrity(&self, name: &str, version: &str, integrity: Integrity) {
        if let Some(stored) = self
            .lock()
            .packages
            .get_mut(name)
            .and_then(|versions| versions.get_mut(version))
        {
            stored.release.integrity = integrity;
        }
    }

    /// Replace the stored artifact bytes without touching the reported integrity.
    pub fn replace_artifact(&self, name: &str, version: &str, artifact: Vec<u8>) {
        if let Some(stored) = self
            .lock()
            .packages
            .get_mut(name)
            .and_then(|versions| versions.get_mut(version))
        {
            stored.artifact = artifact;
        }
    }

    pub fn deny(&self, name: &str) {
        self.lock().denied.insert(name.to_owned());
    }

    /// Make permission checks fail as if the registry could not answer.
    pub fn set_checks_unavailable(&self, unavailable: bool) {
        self.lock().checks_unavailable = unavailable;
    }

    /// `(name, version)` of every successful publish.
    pub fn published(&self) -> Vec<(String, String)> {
        self.lock().published.clone()
    }
}

impl RegistryConnector for MemoryRegistry {
    fn registry(&self) -> RegistryRef {
        self.registry.clone()
    }

    fn package_exists(&self, name: &str, version: Option<&str>) -> Result<bool, RemoteError> {
        let state = self.lock();
        Ok(state
            .packages
            .get(name)
            .is_some_and(|versions| version.is_none_or(|v| versions.contains_key(v))))
    }

    fn releases(&self, name: &str, range: &VersionRange) -> Result<Vec<Release>, RemoteError> {
        let state = self.lock();
        let versions = state
            .packages
            .get(name)
            .ok_or_else(|| RemoteError::NotFound(format!("package {name}")))?;
        let mut releases: Vec<Release> = versions
            .values()
            .filter(|s| clean_version(&s.release.version).is_some_and(|v| range.matches(&v)))
            .map(|s| s.release.clone())
            .collect();
        releases.sort_by_key(|r| clean_version(&r.version));
        Ok(releases)
    }

    fn package(&self, name: &str, tag: &str) -> Result<PackageInfo, RemoteError> {
        let state = self.lock();
        let stored = state
            .packages
            .get(name)
            .ok_or_else(|| RemoteError::NotFound(format!("package {name}")))?;
        let mut versions: Vec<String> = stored.keys().cloned().collect();
        versions.sort_by_key(|v| clean_version(v));
        if tag != "latest" && !versions.iter().any(|v| v == tag) {
            return Err(RemoteError::NotFound(format!("{name}@{tag}")));
        }
        Ok(PackageInfo {
            name: name.to_owned(),
            versions,
        })
    }

    fn artifact(&self, name: &str, version: &str) -> Result<Vec<u8>, RemoteError> {
        self.lock()
            .packages
            .get(name)
            .and_then(|versions| versions.get(version))
            .map(|s| s.artifact.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("artifact {name}@{version}")))
    }

    fn publish_artifact(
        &self,
        name: &str,
        version: &str,
        artifact: &[u8],
        readme: Option<&str>,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        if state.denied.contains(name) {
            return Err(RemoteError::Denied(format!("publish {name}")));
        }
        if state
            .packages
            .get(name)
            .is_some_and(|versions| versions.contains_key(version))
        {
            return Err(RemoteError::Remote(format!(
                "{name}@{version} is already published"
            )));
        }
        state.clock += 1;
        let release = Release {
            version: version.to_owned(),
            integrity: Integrity::of(artifact),
            published_at: DateTime::from_timestamp(state.clock, 0).unwrap_or_default(),
            readme: readme.map(str::to_owned),
        };
        state.packages.entry(name.to_owned()).or_default().insert(
            version.to_owned(),
            StoredRelease {
                release,
                artifact: artifact.to_vec(),
            },
        );
        state.published.push((name.to_owned(), version.to_owned()));
        Ok(())
    }

    fn can_publish_releases(&self, name: &str) -> Result<bool, RemoteError> {
        let state = self.lock();
        if state.checks_unavailable {
            return Err(RemoteError::Remote(
                "permission check unavailable".to_owned(),
            ));
        }
        Ok(!state.denied.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trm_schema::TransportRole;

    #[test]
    fn transport_lifecycle_is_recorded() {
        let system = MemorySystem::new("dev");
        let id = system
            .create_transport(TransportKind::Copies, "test")
            .unwrap();
        assert_eq!(id.as_str(), "DEVK900001");
        let entry = TransportEntry::new(ObjectKey::r3tr("CLAS", "ZCL_A"), Some("ZPKG"));
        system.add_objects(&id, &[entry], true).unwrap();
        system
            .release_transport(&id, &ReleaseOptions::default())
            .unwrap();
        assert!(!system.can_be_deleted(&id).unwrap());
        assert!(system.delete_transport(&id).is_err());
        assert_eq!(
            system.mutations(),
            vec![
                Mutation::Created(id.clone(), TransportKind::Copies),
                Mutation::ObjectsAdded(id.clone()),
                Mutation::Released(id),
            ]
        );
    }

    #[test]
    fn injected_faults_hit_the_nth_call() {
        let system = MemorySystem::new("DEV");
        system.fail_on(Operation::CreateTransport, 2);
        assert!(system.create_transport(TransportKind::Copies, "a").is_ok());
        assert!(system.create_transport(TransportKind::Copies, "b").is_err());
        assert!(system.create_transport(TransportKind::Copies, "c").is_ok());
        assert_eq!(system.calls(Operation::CreateTransport), 3);
    }

    #[test]
    fn release_timeout_carries_the_requested_limit() {
        let system = MemorySystem::new("DEV");
        let id = system.create_transport(TransportKind::Copies, "a").unwrap();
        system.time_out_on(Operation::Release, 1);
        let options = ReleaseOptions {
            timeout: Duration::from_secs(5),
            ..ReleaseOptions::default()
        };
        match system.release_transport(&id, &options) {
            Err(RemoteError::Timeout { after, .. }) => assert_eq!(after, Duration::from_secs(5)),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn export_then_import_registers_objects_and_history() {
        let source = MemorySystem::new("DEV");
        let id = source.create_transport(TransportKind::Copies, "pkg").unwrap();
        source.add_comment(&id, "name=billing").unwrap();
        let entry = TransportEntry::new(ObjectKey::r3tr("TABL", "ZBILL"), Some("ZBILLING"));
        source.add_objects(&id, &[entry.clone()], true).unwrap();
        let data = source.export_transport(&id).unwrap();

        let target = MemorySystem::new("QAS");
        let payload = TransportPayload {
            role: TransportRole::ObjectList,
            transport: id.clone(),
            entries: vec![entry.clone()],
            data,
        };
        target
            .import_transport(&payload, Duration::from_secs(1))
            .unwrap();
        let object = target.get_object(&entry.key).unwrap().unwrap();
        assert_eq!(object.devclass, "ZBILLING");
        assert_eq!(object.src_system, "DEV");
        let history = target.object_transports(&entry.key).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].comments, vec!["name=billing"]);
        assert!(history[0].is_released());
    }

    #[test]
    fn recursive_devclass_lookup_follows_subpackages() {
        let system = MemorySystem::new("DEV");
        system.add_subpackage("ZROOT", "ZCHILD");
        for (name, devclass) in [("ZCL_A", "ZROOT"), ("ZCL_B", "ZCHILD"), ("ZCL_C", "ZOTHER")] {
            system.add_object(ObjectRecord {
                key: ObjectKey::r3tr("CLAS", name),
                devclass: devclass.to_owned(),
                src_system: "DEV".to_owned(),
                author: "DEVELOPER".to_owned(),
            });
        }
        assert_eq!(system.devclass_objects("zroot", false).unwrap().len(), 1);
        assert_eq!(system.devclass_objects("zroot", true).unwrap().len(), 2);
    }

    #[test]
    fn registry_lists_matching_releases_in_order() {
        let registry = MemoryRegistry::public();
        for v in ["1.2.0", "1.0.0", "2.0.0"] {
            registry.add_release("core", v, v.as_bytes().to_vec());
        }
        let range = VersionRange::parse("^1.0.0").unwrap();
        let versions: Vec<String> = registry
            .releases("core", &range)
            .unwrap()
            .into_iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec!["1.0.0", "1.2.0"]);
        assert_eq!(registry.release("core", "2.0.0").unwrap().version, "2.0.0");
        assert!(registry.release("core", "3.0.0").is_err());
        let info = registry.package("core", "latest").unwrap();
        assert_eq!(info.versions.last().map(String::as_str), Some("2.0.0"));
    }

    #[test]
    fn registry_rejects_republish_and_denied_names() {
        let registry = MemoryRegistry::public();
        registry.publish_artifact("core", "1.0.0", b"a", None).unwrap();
        assert!(registry.publish_artifact("core", "1.0.0", b"b", None).is_err());
        registry.deny("secret");
        assert!(!registry.can_publish_releases("secret").unwrap());
        assert!(matches!(
            registry.publish_artifact("secret", "1.0.0", b"a", None),
            Err(RemoteError::Denied(_))
        ));
        assert_eq!(registry.published(), vec![("core".to_owned(), "1.0.0".to_owned())]);
    }
}
