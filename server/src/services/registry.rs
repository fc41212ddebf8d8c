//! Registry adapter: instance/module topology in the coordination store.
//!
//! DESIGN
//! ======
//! Every (namespace, module, instance) binding is stored twice with identical
//! bytes so it can be found from either axis:
//!
//! ```text
//! {root}/infos/modules/{namespace}/{module}/{instance}
//! {root}/infos/instances/{namespace}/{instance}/{module}
//! {root}/routes/{ip}_{port}
//! ```
//!
//! Both copies are written and deleted together. Leaves are ephemeral so a
//! router whose store session dies takes its instances with it; ancestors are
//! persistent and created on demand.
//!
//! A single persistent recursive watch on the module root drives change
//! notification. Each event names a path; the module it belongs to is re-read
//! in full and the hub receives the complete current membership, never a diff.
//!
//! ERROR HANDLING
//! ==============
//! Missing nodes met during update or removal mean the target state is
//! already reached and are absorbed. Everything else propagates; nothing here
//! retries.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::services::hub::Hub;
use crate::store::{CoordinationStore, CreateMode, StoreError, is_node_name, join_path};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("module {module} already registered for instance {instance_id} in namespace {namespace}")]
    DuplicateRegistration { namespace: String, module: String, instance_id: String },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("record encoding error: {0}")]
    Record(#[from] serde_json::Error),
    #[error("invalid {field} name `{value}`")]
    InvalidName { field: &'static str, value: String },
}

impl crate::frame::ErrorCode for RegistryError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateRegistration { .. } => "E_DUPLICATE_REGISTRATION",
            Self::Store(_) => "E_STORE",
            Self::Record(_) => "E_RECORD",
            Self::InvalidName { .. } => "E_INVALID_NAME",
        }
    }

    fn wire_code(&self) -> frames::ErrorCode {
        match self {
            Self::DuplicateRegistration { .. } => frames::ErrorCode::DuplicateRegistration,
            Self::Store(_) | Self::Record(_) => frames::ErrorCode::Internal,
            Self::InvalidName { .. } => frames::ErrorCode::Unknown,
        }
    }
}

/// One running instance as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub profile: String,
    pub instance_id: String,
    pub ip: String,
    pub port: i32,
    pub active: bool,
}

impl From<&InstanceInfo> for frames::InstanceInfo {
    fn from(info: &InstanceInfo) -> Self {
        Self {
            profile: info.profile.clone(),
            instance_id: info.instance_id.clone(),
            ip: info.ip.clone(),
            port: info.port,
            active: info.active,
        }
    }
}

/// Persisted binding of one instance to one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRecord {
    pub namespace: String,
    pub module_name: String,
    pub instance_info: InstanceInfo,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Modify,
    Delete,
}

/// Full current membership of one module after a registry change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleChangeEvent {
    pub namespace: String,
    pub module_name: String,
    pub instances: Vec<InstanceInfo>,
    pub kind: ChangeKind,
}

/// A live router as published under `routes/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterAddress {
    pub ip: String,
    pub port: u16,
}

// =============================================================================
// REGISTRY
// =============================================================================

pub struct Registry {
    store: Arc<dyn CoordinationStore>,
    module_root: String,
    instance_root: String,
    routes_root: String,
}

impl Registry {
    /// Bind to the store under `watch_root`, creating the module and instance roots.
    ///
    /// # Errors
    ///
    /// Returns a store error if the roots cannot be created.
    pub async fn new(store: Arc<dyn CoordinationStore>, watch_root: &str) -> Result<Self, RegistryError> {
        let registry = Self {
            store,
            module_root: join_path(watch_root, &["infos", "modules"]),
            instance_root: join_path(watch_root, &["infos", "instances"]),
            routes_root: join_path(watch_root, &["routes"]),
        };
        for root in [&registry.module_root, &registry.instance_root, &registry.routes_root] {
            registry.ensure_path(root).await?;
        }
        Ok(registry)
    }

    fn module_path(&self, namespace: &str, module: &str, instance_id: &str) -> String {
        join_path(&self.module_root, &[namespace, module, instance_id])
    }

    fn instance_path(&self, namespace: &str, instance_id: &str, module: &str) -> String {
        join_path(&self.instance_root, &[namespace, instance_id, module])
    }

    // =========================================================================
    // REGISTER / UPDATE / REMOVE
    // =========================================================================

    /// Write one record pair per module for a freshly connected instance.
    ///
    /// Not idempotent: an existing binding for any of the modules fails the
    /// whole call with [`RegistryError::DuplicateRegistration`] and writes
    /// nothing. A store failure midway rolls back the pairs already written.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName`, `DuplicateRegistration` or the underlying store error.
    pub async fn register_instance(
        &self,
        namespace: &str,
        instance: &InstanceInfo,
        modules: &[String],
        extra: &BTreeMap<String, String>,
    ) -> Result<(), RegistryError> {
        check_names(namespace, &instance.instance_id, modules)?;
        let modules: BTreeSet<&str> = modules.iter().map(String::as_str).filter(|m| !m.is_empty()).collect();
        let instance_id = instance.instance_id.as_str();

        for module in &modules {
            let taken = self.store.exists(&self.module_path(namespace, module, instance_id)).await?
                || self.store.exists(&self.instance_path(namespace, instance_id, module)).await?;
            if taken {
                return Err(duplicate(namespace, module, instance_id));
            }
        }

        let mut written: Vec<&str> = Vec::with_capacity(modules.len());
        for module in &modules {
            let record = ModuleRecord {
                namespace: namespace.to_owned(),
                module_name: (*module).to_owned(),
                instance_info: instance.clone(),
                extra: extra.clone(),
                active: instance.active,
            };
            let result = self.write_pair(&record).await;
            if let Err(e) = result {
                warn!(namespace, instance_id, module, error = %e, "registry: register failed; rolling back");
                for done in written.iter().chain(std::iter::once(module)) {
                    self.remove_module(namespace, done, instance_id).await;
                }
                self.prune_instance_node(namespace, instance_id).await;
                return Err(match e {
                    RegistryError::Store(StoreError::NodeExists(_)) => duplicate(namespace, module, instance_id),
                    other => other,
                });
            }
            written.push(*module);
        }

        info!(namespace, instance_id, modules = modules.len(), "registry: instance registered");
        Ok(())
    }

    async fn write_pair(&self, record: &ModuleRecord) -> Result<(), RegistryError> {
        let bytes = serde_json::to_vec(record)?;
        let id = &record.instance_info.instance_id;
        self.create_recursive(&self.module_path(&record.namespace, &record.module_name, id), &bytes, CreateMode::Ephemeral)
            .await?;
        self.create_recursive(&self.instance_path(&record.namespace, id, &record.module_name), &bytes, CreateMode::Ephemeral)
            .await?;
        Ok(())
    }

    /// Rewrite every record of an instance with new `extra` and, when given, a new `active` flag.
    ///
    /// `active: None` is the heartbeat path and leaves activity untouched.
    /// Records that vanish between read and write are skipped.
    ///
    /// # Errors
    ///
    /// Returns store or encoding errors other than missing nodes.
    pub async fn update_instance(
        &self,
        namespace: &str,
        instance_id: &str,
        extra: &BTreeMap<String, String>,
        active: Option<bool>,
    ) -> Result<(), RegistryError> {
        let instance_node = join_path(&self.instance_root, &[namespace, instance_id]);
        let modules = match self.store.children(&instance_node).await {
            Ok(modules) => modules,
            Err(StoreError::NoNode(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for module in modules {
            let instance_path = self.instance_path(namespace, instance_id, &module);
            let current = match self.store.get_data(&instance_path).await {
                Ok(bytes) => bytes,
                Err(StoreError::NoNode(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            let mut record: ModuleRecord = serde_json::from_slice(&current)?;
            record.extra.clone_from(extra);
            if let Some(active) = active {
                record.active = active;
                record.instance_info.active = active;
            }
            let bytes = serde_json::to_vec(&record)?;
            if bytes == current {
                continue;
            }

            let module_path = self.module_path(namespace, &module, instance_id);
            for path in [&module_path, &instance_path] {
                match self.store.set_data(path, &bytes).await {
                    Ok(()) | Err(StoreError::NoNode(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            debug!(namespace, instance_id, module = %module, ?active, "registry: instance updated");
        }
        Ok(())
    }

    /// Delete every record of an instance from both trees, then its own node.
    ///
    /// A module whose last instance is removed loses its node too, which is
    /// what tells watchers the module is gone.
    ///
    /// # Errors
    ///
    /// Returns store errors other than missing nodes.
    pub async fn remove_instance(&self, namespace: &str, instance_id: &str) -> Result<(), RegistryError> {
        let instance_node = join_path(&self.instance_root, &[namespace, instance_id]);
        let modules = match self.store.children(&instance_node).await {
            Ok(modules) => modules,
            Err(StoreError::NoNode(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for module in &modules {
            self.remove_module(namespace, module, instance_id).await;
        }
        match self.store.delete(&instance_node).await {
            Ok(()) | Err(StoreError::NoNode(_)) => {}
            Err(e) => return Err(e.into()),
        }
        info!(namespace, instance_id, modules = modules.len(), "registry: instance removed");
        Ok(())
    }

    /// Remove one binding pair and prune the module node if it became empty.
    async fn remove_module(&self, namespace: &str, module: &str, instance_id: &str) {
        for path in [self.module_path(namespace, module, instance_id), self.instance_path(namespace, instance_id, module)] {
            match self.store.delete(&path).await {
                Ok(()) | Err(StoreError::NoNode(_)) => {}
                Err(e) => warn!(path = %path, error = %e, "registry: failed to delete record"),
            }
        }

        let module_node = join_path(&self.module_root, &[namespace, module]);
        match self.store.children(&module_node).await {
            Ok(children) if children.is_empty() => match self.store.delete(&module_node).await {
                Ok(()) | Err(StoreError::NoNode(_) | StoreError::NotEmpty(_)) => {}
                Err(e) => warn!(path = %module_node, error = %e, "registry: failed to prune module node"),
            },
            Ok(_) | Err(StoreError::NoNode(_)) => {}
            Err(e) => warn!(path = %module_node, error = %e, "registry: failed to list module node"),
        }
    }

    async fn prune_instance_node(&self, namespace: &str, instance_id: &str) {
        let instance_node = join_path(&self.instance_root, &[namespace, instance_id]);
        match self.store.delete(&instance_node).await {
            Ok(()) | Err(StoreError::NoNode(_) | StoreError::NotEmpty(_)) => {}
            Err(e) => warn!(path = %instance_node, error = %e, "registry: failed to prune instance node"),
        }
    }

    // =========================================================================
    // ROUTERS
    // =========================================================================

    /// Publish this router's address. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns store errors other than the marker already existing.
    pub async fn register_self(&self, addr: &RouterAddress) -> Result<(), RegistryError> {
        let path = join_path(&self.routes_root, &[&format!("{}_{}", addr.ip, addr.port)]);
        if self.store.exists(&path).await? {
            return Ok(());
        }
        match self.create_recursive(&path, &[], CreateMode::Ephemeral).await {
            Ok(()) | Err(StoreError::NodeExists(_)) => {
                info!(ip = %addr.ip, port = addr.port, "registry: router published");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Every router currently published.
    ///
    /// # Errors
    ///
    /// Returns store errors other than a missing routes root.
    pub async fn routers(&self) -> Result<Vec<RouterAddress>, RegistryError> {
        let children = match self.store.children(&self.routes_root).await {
            Ok(children) => children,
            Err(StoreError::NoNode(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(children.iter().filter_map(|name| parse_router(name)).collect())
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Raw stored records of a namespace, keyed by module. Diagnostic only.
    ///
    /// # Errors
    ///
    /// Returns store errors other than missing nodes.
    pub async fn module_records(&self, namespace: &str) -> Result<BTreeMap<String, Vec<String>>, RegistryError> {
        if !is_node_name(namespace) {
            return Ok(BTreeMap::new());
        }
        let namespace_node = join_path(&self.module_root, &[namespace]);
        let modules = match self.store.children(&namespace_node).await {
            Ok(modules) => modules,
            Err(StoreError::NoNode(_)) => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = BTreeMap::new();
        for module in modules {
            let module_node = join_path(&namespace_node, &[&module]);
            let instances = match self.store.children(&module_node).await {
                Ok(instances) => instances,
                Err(StoreError::NoNode(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            let mut records = Vec::with_capacity(instances.len());
            for instance in instances {
                match self.store.get_data(&join_path(&module_node, &[&instance])).await {
                    Ok(bytes) => records.push(String::from_utf8_lossy(&bytes).into_owned()),
                    Err(StoreError::NoNode(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            out.insert(module, records);
        }
        Ok(out)
    }

    /// Re-read one module and describe its current membership.
    ///
    /// A missing or empty module yields a `Delete` event.
    ///
    /// # Errors
    ///
    /// Returns store errors other than missing nodes.
    pub async fn module_snapshot(&self, namespace: &str, module: &str) -> Result<ModuleChangeEvent, RegistryError> {
        let module_node = join_path(&self.module_root, &[namespace, module]);
        let children = match self.store.children(&module_node).await {
            Ok(children) => children,
            Err(StoreError::NoNode(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut instances = Vec::with_capacity(children.len());
        for child in children {
            let bytes = match self.store.get_data(&join_path(&module_node, &[&child])).await {
                Ok(bytes) => bytes,
                Err(StoreError::NoNode(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<ModuleRecord>(&bytes) {
                Ok(record) => instances.push(record.instance_info),
                Err(e) => warn!(namespace, module, instance = %child, error = %e, "registry: unreadable record"),
            }
        }

        let kind = if instances.is_empty() { ChangeKind::Delete } else { ChangeKind::Modify };
        Ok(ModuleChangeEvent { namespace: namespace.to_owned(), module_name: module.to_owned(), instances, kind })
    }

    /// Current membership of every non-empty module in a namespace.
    ///
    /// # Errors
    ///
    /// Returns store errors other than missing nodes.
    pub async fn namespace_snapshot(&self, namespace: &str) -> Result<Vec<ModuleChangeEvent>, RegistryError> {
        let modules = match self.store.children(&join_path(&self.module_root, &[namespace])).await {
            Ok(modules) => modules,
            Err(StoreError::NoNode(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::with_capacity(modules.len());
        for module in modules {
            let change = self.module_snapshot(namespace, &module).await?;
            if change.kind == ChangeKind::Modify {
                out.push(change);
            }
        }
        Ok(out)
    }

    // =========================================================================
    // WATCH
    // =========================================================================

    /// Install the recursive module watch and forward every change to `hub`.
    ///
    /// The returned task runs until the store session closes.
    ///
    /// # Errors
    ///
    /// Returns a store error if the watch cannot be installed.
    pub async fn spawn_watch(self: &Arc<Self>, hub: Arc<Hub>) -> Result<JoinHandle<()>, RegistryError> {
        let mut events = self.store.watch_recursive(&self.module_root).await?;
        let registry = Arc::clone(self);
        info!(root = %self.module_root, "registry: module watch installed");

        Ok(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some((namespace, module)) = registry.module_of(&event.path) else {
                    continue;
                };
                match registry.module_snapshot(namespace, module).await {
                    Ok(change) => {
                        let delivered = hub.notify(&change).await;
                        debug!(namespace, module, kind = ?change.kind, delivered, "registry: change fanned out");
                    }
                    Err(e) => warn!(namespace, module, error = %e, "registry: failed to read module after change"),
                }
            }
            info!("registry: module watch ended");
        }))
    }

    /// `(namespace, module)` for a path at or below a module node.
    fn module_of<'a>(&self, path: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = path.strip_prefix(self.module_root.as_str())?.strip_prefix('/')?;
        let mut parts = rest.split('/');
        let namespace = parts.next().filter(|s| !s.is_empty())?;
        let module = parts.next().filter(|s| !s.is_empty())?;
        Some((namespace, module))
    }

    // =========================================================================
    // PATHS
    // =========================================================================

    /// Create `path` with the requested mode, creating missing ancestors as persistent nodes.
    ///
    /// Ancestors that appear concurrently are fine; the leaf already existing
    /// is reported as [`StoreError::NodeExists`].
    async fn create_recursive(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<(), StoreError> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut current = String::new();
        for (i, segment) in segments.iter().enumerate() {
            current.push('/');
            current.push_str(segment);
            if i + 1 == segments.len() {
                return self.store.create(&current, data, mode).await;
            }
            if !self.store.exists(&current).await? {
                match self.store.create(&current, &[], CreateMode::Persistent).await {
                    Ok(()) | Err(StoreError::NodeExists(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    async fn ensure_path(&self, path: &str) -> Result<(), StoreError> {
        match self.create_recursive(path, &[], CreateMode::Persistent).await {
            Ok(()) | Err(StoreError::NodeExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Check that every name of a registration maps to exactly one store node.
///
/// Empty module names are allowed here; registration skips them.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidName`] for the first offending name.
pub fn check_names(namespace: &str, instance_id: &str, modules: &[String]) -> Result<(), RegistryError> {
    let invalid = |field, value: &str| RegistryError::InvalidName { field, value: value.to_owned() };
    if !is_node_name(namespace) {
        return Err(invalid("namespace", namespace));
    }
    if !is_node_name(instance_id) {
        return Err(invalid("instance", instance_id));
    }
    match modules.iter().find(|m| !m.is_empty() && !is_node_name(m)) {
        Some(module) => Err(invalid("module", module)),
        None => Ok(()),
    }
}

fn duplicate(namespace: &str, module: &str, instance_id: &str) -> RegistryError {
    RegistryError::DuplicateRegistration {
        namespace: namespace.to_owned(),
        module: module.to_owned(),
        instance_id: instance_id.to_owned(),
    }
}

fn parse_router(name: &str) -> Option<RouterAddress> {
    let Some((ip, port)) = name.rsplit_once('_') else {
        warn!(name, "registry: malformed router marker");
        return None;
    };
    match port.parse() {
        Ok(port) if !ip.is_empty() => Some(RouterAddress { ip: ip.to_owned(), port }),
        _ => {
            warn!(name, "registry: malformed router marker");
            None
        }
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
