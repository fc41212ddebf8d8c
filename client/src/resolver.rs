//! Consumer-side module directories and instance selection.
//!
//! DESIGN
//! ======
//! [`Modules`] maps each announced module to a [`ModuleDirectory`], which
//! maps instance ids to [`ModuleClient`]s in id order. Change notifications
//! from the router are merged in with [`Modules::apply`]: instances missing
//! from a snapshot are marked inactive in place rather than dropped, and a
//! `Delete` removes the whole directory.
//!
//! Selection is sticky. A directory keeps returning its last pick while that
//! client stays active; otherwise it picks
//! `active[xxh3(own_instance_id) % active.len()]`, so one consumer lands on
//! the same backend for as long as the active set is unchanged.
//!
//! LIFECYCLE
//! =========
//! A client's [`PeerSession`] is dialed on first use, not when the instance
//! is announced. The check-then-connect is serialized by the session lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use frames::{InstanceInfo, ModuleInfo, OpsType, PeerFrame, PeerKind};
use tokio::sync::RwLock;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::ClientError;
use crate::peer::{Connector, PeerSession, PeerStream};

// =============================================================================
// MODULES
// =============================================================================

/// Every module this consumer has been told about.
pub struct Modules {
    own_hash: u64,
    connector: Arc<dyn Connector>,
    directories: RwLock<HashMap<String, Arc<ModuleDirectory>>>,
}

impl Modules {
    #[must_use]
    pub fn new(own_instance_id: &str, connector: Arc<dyn Connector>) -> Self {
        Self { own_hash: xxh3_64(own_instance_id.as_bytes()), connector, directories: RwLock::default() }
    }

    /// Merge one change notification.
    pub async fn apply(&self, change: &ModuleInfo) {
        match change.ops() {
            OpsType::Delete => {
                if self.directories.write().await.remove(&change.module_name).is_some() {
                    tracing::info!(module = %change.module_name, "module removed");
                }
            }
            OpsType::Modify => {
                let directory = self
                    .directories
                    .write()
                    .await
                    .entry(change.module_name.clone())
                    .or_insert_with(|| {
                        Arc::new(ModuleDirectory::new(&change.module_name, self.own_hash, self.connector.clone()))
                    })
                    .clone();
                directory.update(&change.instances).await;
            }
        }
    }

    /// Directory for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownModule`] when no change for `name` has
    /// been applied, or the module was deleted.
    pub async fn module(&self, name: &str) -> Result<Arc<ModuleDirectory>, ClientError> {
        self.directories.read().await.get(name).cloned().ok_or_else(|| ClientError::UnknownModule(name.to_owned()))
    }

    /// Resolve `name` to its selected instance.
    ///
    /// # Errors
    ///
    /// [`ClientError::UnknownModule`] or [`ClientError::ServiceUnavailable`].
    pub async fn use_module(&self, name: &str) -> Result<Arc<ModuleClient>, ClientError> {
        self.module(name).await?.select().await
    }

    /// Current view of every directory, keyed and ordered by module name.
    pub async fn topology(&self) -> BTreeMap<String, Vec<InstanceInfo>> {
        let directories: Vec<_> = self.directories.read().await.values().cloned().collect();
        let mut out = BTreeMap::new();
        for directory in directories {
            out.insert(directory.name().to_owned(), directory.instances().await);
        }
        out
    }

    /// Close every connected peer session and forget all directories.
    pub async fn clear(&self) {
        let drained: Vec<_> = self.directories.write().await.drain().map(|(_, d)| d).collect();
        for directory in drained {
            directory.close().await;
        }
    }
}

// =============================================================================
// DIRECTORY
// =============================================================================

/// Candidate instances for one module.
pub struct ModuleDirectory {
    name: String,
    own_hash: u64,
    connector: Arc<dyn Connector>,
    clients: RwLock<BTreeMap<String, Arc<ModuleClient>>>,
    selected: RwLock<Option<Arc<ModuleClient>>>,
}

impl ModuleDirectory {
    #[must_use]
    pub fn new(name: &str, own_hash: u64, connector: Arc<dyn Connector>) -> Self {
        Self {
            name: name.to_owned(),
            own_hash,
            connector,
            clients: RwLock::default(),
            selected: RwLock::default(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Merge a full instance snapshot. Known ids take the new info, unknown
    /// ids are added, and ids absent from `instances` go inactive.
    pub async fn update(&self, instances: &[InstanceInfo]) {
        let mut clients = self.clients.write().await;
        for info in instances {
            match clients.get(&info.instance_id) {
                Some(client) => client.update(info.clone()).await,
                None => {
                    let client = ModuleClient::new(&self.name, info.clone(), self.connector.clone());
                    clients.insert(info.instance_id.clone(), Arc::new(client));
                }
            }
        }
        for (id, client) in clients.iter() {
            if !instances.iter().any(|i| &i.instance_id == id) {
                client.mark_inactive().await;
            }
        }
        tracing::debug!(
            module = %self.name,
            known = clients.len(),
            active = clients.values().filter(|c| c.is_active()).count(),
            "module directory updated"
        );
    }

    /// Pick the instance this consumer should talk to.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ServiceUnavailable`] when no instance is active.
    pub async fn select(&self) -> Result<Arc<ModuleClient>, ClientError> {
        if let Some(current) = self.selected.read().await.as_ref() {
            if current.is_active() {
                return Ok(current.clone());
            }
        }

        let active: Vec<Arc<ModuleClient>> =
            self.clients.read().await.values().filter(|c| c.is_active()).cloned().collect();
        if active.is_empty() {
            return Err(ClientError::ServiceUnavailable(self.name.clone()));
        }
        let index = usize::try_from(self.own_hash % active.len() as u64).unwrap_or_default();
        let chosen = active[index].clone();
        *self.selected.write().await = Some(chosen.clone());
        Ok(chosen)
    }

    /// Instance infos in id order, inactive ones included.
    pub async fn instances(&self) -> Vec<InstanceInfo> {
        let clients: Vec<_> = self.clients.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(clients.len());
        for client in clients {
            out.push(client.info().await);
        }
        out
    }

    async fn close(&self) {
        let clients: Vec<_> = self.clients.read().await.values().cloned().collect();
        for client in clients {
            client.close().await;
        }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// One instance of a module plus its lazily dialed session.
pub struct ModuleClient {
    module: String,
    info: RwLock<InstanceInfo>,
    active: AtomicBool,
    connector: Arc<dyn Connector>,
    session: RwLock<Option<Arc<dyn PeerSession>>>,
}

impl ModuleClient {
    fn new(module: &str, info: InstanceInfo, connector: Arc<dyn Connector>) -> Self {
        Self {
            module: module.to_owned(),
            active: AtomicBool::new(info.active),
            info: RwLock::new(info),
            connector,
            session: RwLock::default(),
        }
    }

    pub async fn info(&self) -> InstanceInfo {
        self.info.read().await.clone()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    async fn update(&self, info: InstanceInfo) {
        let active = info.active;
        *self.info.write().await = info;
        self.active.store(active, Ordering::Release);
    }

    async fn mark_inactive(&self) {
        self.info.write().await.active = false;
        self.active.store(false, Ordering::Release);
    }

    /// The peer session, dialed on first call.
    ///
    /// # Errors
    ///
    /// Propagates the connector's failure; the next call dials again.
    pub async fn session(&self) -> Result<Arc<dyn PeerSession>, ClientError> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Ok(session.clone());
        }
        let mut slot = self.session.write().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }
        let info = self.info().await;
        let session = self.connector.connect(&info, &self.module).await?;
        tracing::debug!(module = %self.module, instance_id = %info.instance_id, "module session established");
        *slot = Some(session.clone());
        Ok(session)
    }

    async fn close(&self) {
        if let Some(session) = self.session.write().await.take() {
            session.close().await;
        }
    }

    fn ensure_active(&self) -> Result<(), ClientError> {
        if self.is_active() { Ok(()) } else { Err(ClientError::ServiceUnavailable(self.module.clone())) }
    }

    /// Fire-and-forget command. Delivery is not acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ServiceUnavailable`] when the instance is inactive.
    pub fn forget(self: &Arc<Self>, command: i32) -> Result<ForgetCommand, ClientError> {
        self.ensure_active()?;
        Ok(ForgetCommand { target: self.clone(), command, payload: Vec::new() })
    }

    /// Request expecting exactly one reply.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ServiceUnavailable`] when the instance is inactive.
    pub fn request(self: &Arc<Self>, command: i32) -> Result<RequestCommand, ClientError> {
        self.ensure_active()?;
        Ok(RequestCommand { target: self.clone(), command, payload: Vec::new() })
    }

    /// Request expecting a stream of replies.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ServiceUnavailable`] when the instance is inactive.
    pub fn stream(self: &Arc<Self>, command: i32) -> Result<StreamCommand, ClientError> {
        self.ensure_active()?;
        Ok(StreamCommand { target: self.clone(), command, payload: Vec::new() })
    }

    /// Error notification carrying an application code.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ServiceUnavailable`] when the instance is inactive.
    pub fn error(self: &Arc<Self>, command: i32, code: i32) -> Result<ErrorCommand, ClientError> {
        self.ensure_active()?;
        Ok(ErrorCommand { target: self.clone(), command, code, message: String::new() })
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

pub struct ForgetCommand {
    target: Arc<ModuleClient>,
    command: i32,
    payload: Vec<u8>,
}

impl ForgetCommand {
    #[must_use]
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// # Errors
    ///
    /// Connection failures and [`ClientError::Closed`].
    pub async fn send(self) -> Result<(), ClientError> {
        let session = self.target.session().await?;
        session.send(PeerFrame::new(0, self.command, PeerKind::Forget, self.payload)).await
    }
}

pub struct RequestCommand {
    target: Arc<ModuleClient>,
    command: i32,
    payload: Vec<u8>,
}

impl RequestCommand {
    #[must_use]
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Send and wait for the reply payload. Wrap in `tokio::time::timeout`
    /// to bound the wait.
    ///
    /// # Errors
    ///
    /// Connection failures, [`ClientError::Remote`] and [`ClientError::Closed`].
    pub async fn send(self) -> Result<Vec<u8>, ClientError> {
        let session = self.target.session().await?;
        session.call(PeerFrame::new(0, self.command, PeerKind::Request, self.payload)).await
    }
}

pub struct StreamCommand {
    target: Arc<ModuleClient>,
    command: i32,
    payload: Vec<u8>,
}

impl StreamCommand {
    #[must_use]
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// # Errors
    ///
    /// Connection failures and [`ClientError::Closed`].
    pub async fn open(self) -> Result<PeerStream, ClientError> {
        let session = self.target.session().await?;
        session.open_stream(PeerFrame::new(0, self.command, PeerKind::StreamRequest, self.payload)).await
    }
}

pub struct ErrorCommand {
    target: Arc<ModuleClient>,
    command: i32,
    code: i32,
    message: String,
}

impl ErrorCommand {
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// # Errors
    ///
    /// Connection failures and [`ClientError::Closed`].
    pub async fn send(self) -> Result<(), ClientError> {
        let session = self.target.session().await?;
        let mut frame = PeerFrame::new(0, self.command, PeerKind::Error, self.message.into_bytes());
        frame.code = self.code;
        session.send(frame).await
    }
}

#[cfg(test)]
#[path = "resolver_test.rs"]
mod tests;
