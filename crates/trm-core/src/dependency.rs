//! Dependency discovery from object usage.
//!
//! Every object a package references is attributed to exactly one edge: the
//! package that last shipped it (found through the trm comments on its
//! transports), the vendor, or an unresolved local group named after the
//! object's devclass. References that cannot be looked up at all land in the
//! [`UNREADABLE_GROUP`] local group.

use crate::config::CoreConfig;
use crate::context::Context;
use crate::parsers::ObjectParsers;
use crate::CoreError;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use trm_remote::{ObjectRecord, SystemConnector, TrmTag};
use trm_schema::{
    clean_version, DependencyDecl, Integrity, ObjectKey, Package, PackageIdentity, RegistryRef,
    VersionRange,
};

/// Group name of the single edge collecting vendor objects.
pub const VENDOR_GROUP: &str = "VENDOR";

/// Group name of the local edge collecting references that could not be looked up.
pub const UNREADABLE_GROUP: &str = "UNREADABLE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Vendor,
    /// User-owned, but not shipped by any known package.
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeTarget {
    Package {
        identity: PackageIdentity,
        version: String,
        integrity: Integrity,
    },
    Unresolved {
        owner: Owner,
        group: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub target: EdgeTarget,
    /// Referenced objects attributed to this edge.
    pub contributing_objects: Vec<ObjectKey>,
    /// Objects of the package that reference them.
    pub usage_sites: Vec<ObjectKey>,
}

impl DependencyEdge {
    pub fn identity(&self) -> Option<&PackageIdentity> {
        match &self.target {
            EdgeTarget::Package { identity, .. } => Some(identity),
            EdgeTarget::Unresolved { .. } => None,
        }
    }

    /// Package edges report the newest version any contributing object was shipped with.
    fn raise_version(&mut self, candidate: &str) {
        if let EdgeTarget::Package { version, .. } = &mut self.target {
            if clean_version(candidate) > clean_version(version) {
                *version = candidate.to_owned();
            }
        }
    }

    fn add_usage(&mut self, contributing: &ObjectKey, site: &ObjectKey) {
        if !self.contributing_objects.contains(contributing) {
            self.contributing_objects.push(contributing.clone());
        }
        if !self.usage_sites.contains(site) {
            self.usage_sites.push(site.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyReport {
    pub edges: Vec<DependencyEdge>,
    /// The resolved package edges as manifest dependency declarations.
    pub package_dependencies: Vec<DependencyDecl>,
}

impl DependencyReport {
    pub fn unresolved(&self, owner: Owner) -> impl Iterator<Item = &DependencyEdge> {
        self.edges.iter().filter(
            move |e| matches!(&e.target, EdgeTarget::Unresolved { owner: o, .. } if *o == owner),
        )
    }
}

/// A node of the deep dependency tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    pub identity: PackageIdentity,
    /// Installed version, or the declared range when not installed.
    pub version: String,
    pub installed: bool,
    /// Already on the path from the root; children come from its manifest
    /// without further recursion.
    pub circular: bool,
    pub dependencies: Vec<DependencyNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EdgeKey {
    Package(PackageIdentity),
    Vendor,
    Local(String),
}

pub struct DependencyResolver<'a> {
    system: &'a dyn SystemConnector,
    config: &'a CoreConfig,
    ctx: &'a Context,
    parsers: ObjectParsers,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(system: &'a dyn SystemConnector, config: &'a CoreConfig, ctx: &'a Context) -> Self {
        Self {
            system,
            config,
            ctx,
            parsers: ObjectParsers::default(),
        }
    }

    #[must_use]
    pub fn with_parsers(mut self, parsers: ObjectParsers) -> Self {
        self.parsers = parsers;
        self
    }

    /// Resolve the dependencies of every object in `devclass` and its subpackages.
    pub fn resolve_devclass(
        &self,
        devclass: &str,
        exclude: Option<&PackageIdentity>,
    ) -> Result<DependencyReport, CoreError> {
        let objects: Vec<ObjectKey> = self
            .system
            .devclass_objects(devclass, true)?
            .into_iter()
            .map(|o| o.key)
            .collect();
        self.resolve(&objects, exclude)
    }

    /// Resolve the dependencies of `objects`, the package's own objects.
    ///
    /// References between `objects` are ignored, as are references to
    /// `exclude` (the package itself, when a previous version was shipped).
    pub fn resolve(
        &self,
        objects: &[ObjectKey],
        exclude: Option<&PackageIdentity>,
    ) -> Result<DependencyReport, CoreError> {
        let own: HashSet<&ObjectKey> = objects.iter().collect();
        let mut edges: Vec<DependencyEdge> = Vec::new();
        let mut by_key: HashMap<EdgeKey, usize> = HashMap::new();
        let mut attributed: HashMap<ObjectKey, Option<usize>> = HashMap::new();

        for site in objects {
            let usages = match self.system.repository_environment(site) {
                Ok(usages) => usages,
                Err(e) => {
                    self.ctx
                        .warn(format!("cannot read usage environment of {site}: {e}"));
                    continue;
                }
            };

            for usage in &usages {
                let record = match self.parsers.parse(self.system, usage) {
                    Ok(Some(record)) => Some(record),
                    Ok(None) => continue,
                    Err(e) => {
                        self.ctx.warn(format!(
                            "cannot look up {} {} used by {site}: {e}",
                            usage.object_type, usage.name
                        ));
                        None
                    }
                };
                let key = record.as_ref().map_or_else(
                    || ObjectKey::r3tr(&usage.object_type, &usage.name),
                    |r| r.key.clone(),
                );
                if own.contains(&key) {
                    continue;
                }

                match attributed.get(&key) {
                    Some(Some(index)) => {
                        edges[*index].add_usage(&key, site);
                        continue;
                    }
                    Some(None) => continue,
                    None => {}
                }

                let classified = match &record {
                    Some(record) => self.classify(record, exclude),
                    None => Some((EdgeKey::Local(UNREADABLE_GROUP.to_owned()), String::new())),
                };
                let Some((edge_key, version)) = classified else {
                    attributed.insert(key, None);
                    continue;
                };
                let index = match by_key.get(&edge_key) {
                    Some(index) => {
                        edges[*index].raise_version(&version);
                        *index
                    }
                    None => {
                        let target = self.edge_target(&edge_key, version)?;
                        edges.push(DependencyEdge {
                            target,
                            contributing_objects: Vec::new(),
                            usage_sites: Vec::new(),
                        });
                        by_key.insert(edge_key, edges.len() - 1);
                        edges.len() - 1
                    }
                };
                edges[index].add_usage(&key, site);
                attributed.insert(key, Some(index));
            }
        }

        let installed = if edges.iter().any(|e| e.identity().is_some()) {
            self.system.installed_packages()?
        } else {
            Vec::new()
        };
        let package_dependencies = edges
            .iter()
            .filter_map(|edge| self.declaration(edge, &installed))
            .collect();
        info!(
            "resolved {} dependency edges for {} objects",
            edges.len(),
            objects.len()
        );
        Ok(DependencyReport {
            edges,
            package_dependencies,
        })
    }

    /// Which edge `record` belongs to, with the shipped version for package
    /// edges; `None` for references to `exclude`.
    fn classify(
        &self,
        record: &ObjectRecord,
        exclude: Option<&PackageIdentity>,
    ) -> Option<(EdgeKey, String)> {
        if self.config.vendor.is_vendor(record) {
            return Some((EdgeKey::Vendor, String::new()));
        }
        match self.latest_trm_tag(&record.key) {
            Ok(Some(tag)) => {
                let identity = tag.identity();
                if exclude == Some(&identity) {
                    None
                } else {
                    Some((EdgeKey::Package(identity), tag.version))
                }
            }
            Ok(None) => Some((EdgeKey::Local(record.devclass.clone()), String::new())),
            Err(e) => {
                self.ctx.warn(format!(
                    "cannot read transports of {}, treating it as unresolved: {e}",
                    record.key
                ));
                Some((EdgeKey::Local(record.devclass.clone()), String::new()))
            }
        }
    }

    fn edge_target(&self, key: &EdgeKey, version: String) -> Result<EdgeTarget, CoreError> {
        Ok(match key {
            EdgeKey::Vendor => EdgeTarget::Unresolved {
                owner: Owner::Vendor,
                group: VENDOR_GROUP.to_owned(),
            },
            EdgeKey::Local(devclass) => EdgeTarget::Unresolved {
                owner: Owner::Local,
                group: devclass.clone(),
            },
            EdgeKey::Package(identity) => {
                let integrity = self
                    .system
                    .package_integrity(identity)
                    .map_err(|e| CoreError::MissingIntegrity(format!("{identity}: {e}")))?;
                debug!("new dependency on {identity} {version}");
                EdgeTarget::Package {
                    identity: identity.clone(),
                    version,
                    integrity,
                }
            }
        })
    }

    /// The most recent transport containing `key` that carries trm comments.
    fn latest_trm_tag(&self, key: &ObjectKey) -> Result<Option<TrmTag>, CoreError> {
        let transports = self.system.object_transports(key)?;
        Ok(transports
            .iter()
            .filter_map(|t| t.trm_tag().map(|tag| (t, tag)))
            .max_by(|(a, _), (b, _)| a.timestamp().cmp(&b.timestamp()).then(a.id.cmp(&b.id)))
            .map(|(_, tag)| tag))
    }

    fn declaration(&self, edge: &DependencyEdge, installed: &[Package]) -> Option<DependencyDecl> {
        let EdgeTarget::Package {
            identity,
            version,
            integrity,
        } = &edge.target
        else {
            return None;
        };
        let installed = installed.iter().find(|p| &p.identity() == identity);
        let range = match clean_version(version) {
            Some(v) if installed.is_none_or(|p| p.manifest.backwards_compatible) => {
                VersionRange::caret(&v).to_string()
            }
            Some(v) => VersionRange::exact(&v).to_string(),
            None => {
                self.ctx.warn(format!(
                    "{identity} carries an unusable version '{version}', depending on any version"
                ));
                VersionRange::any().to_string()
            }
        };
        Some(DependencyDecl {
            name: identity.name.clone(),
            version: range,
            integrity: integrity.to_string(),
            registry: registry_field(&identity.registry),
        })
    }

    /// Build the full dependency tree of `root` from the manifests of the
    /// packages installed on the system.
    pub fn resolve_tree(&self, root: &Package) -> Result<DependencyNode, CoreError> {
        let installed = self.system.installed_packages()?;
        let mut path = vec![root.identity()];
        let dependencies = self.subtree(&root.manifest.dependencies, &installed, &mut path)?;
        Ok(DependencyNode {
            identity: root.identity(),
            version: root.manifest.version.clone(),
            installed: true,
            circular: false,
            dependencies,
        })
    }

    fn subtree(
        &self,
        decls: &[DependencyDecl],
        installed: &[Package],
        path: &mut Vec<PackageIdentity>,
    ) -> Result<Vec<DependencyNode>, CoreError> {
        let mut nodes = Vec::with_capacity(decls.len());
        for decl in decls {
            let identity = PackageIdentity::new(
                &decl.name,
                self.config.resolve_registry(decl.registry.as_deref()),
            )?;
            let Some(package) = installed.iter().find(|p| p.identity() == identity) else {
                nodes.push(DependencyNode {
                    identity,
                    version: decl.version.clone(),
                    installed: false,
                    circular: false,
                    dependencies: Vec::new(),
                });
                continue;
            };

            let circular = path.contains(&identity);
            let dependencies = if circular {
                debug!("circular dependency on {identity}");
                package
                    .manifest
                    .dependencies
                    .iter()
                    .map(|d| self.leaf(d, installed))
                    .collect::<Result<_, _>>()?
            } else {
                path.push(identity.clone());
                let children = self.subtree(&package.manifest.dependencies, installed, path);
                path.pop();
                children?
            };
            nodes.push(DependencyNode {
                identity,
                version: package.manifest.version.clone(),
                installed: true,
                circular,
                dependencies,
            });
        }
        Ok(nodes)
    }

    fn leaf(&self, decl: &DependencyDecl, installed: &[Package]) -> Result<DependencyNode, CoreError> {
        let identity = PackageIdentity::new(
            &decl.name,
            self.config.resolve_registry(decl.registry.as_deref()),
        )?;
        let package = installed.iter().find(|p| p.identity() == identity);
        Ok(DependencyNode {
            version: package.map_or_else(|| decl.version.clone(), |p| p.manifest.version.clone()),
            installed: package.is_some(),
            circular: false,
            dependencies: Vec::new(),
            identity,
        })
    }
}

/// Manifest `registry` field for a resolved registry: absent for the public one.
pub(crate) fn registry_field(registry: &RegistryRef) -> Option<String> {
    if registry.is_public() {
        None
    } else {
        Some(registry.endpoint().to_owned())
    }
}
