//! Notification hub: live routing sessions grouped by namespace.
//!
//! DESIGN
//! ======
//! A two-level map: namespace → instance id → session. The outer map only
//! grows; a namespace entry is cheap and removing it would race with a
//! concurrent register that already holds the entry.
//!
//! `notify` encodes the `ChangeService` frame once and pushes the same bytes
//! to every session of the namespace without waiting. A slow or closing
//! session loses the frame; the next change carries full membership again.

use std::collections::HashMap;
use std::sync::Arc;

use frames::{FrameType, ModuleInfo, OpsType, RoutingFrame};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::services::registry::{ChangeKind, ModuleChangeEvent};
use crate::services::session::Session;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("instance {instance_id} already connected in namespace {namespace}")]
    DuplicateRegistration { namespace: String, instance_id: String },
}

impl crate::frame::ErrorCode for HubError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateRegistration { .. } => "E_DUPLICATE_SESSION",
        }
    }

    fn wire_code(&self) -> frames::ErrorCode {
        frames::ErrorCode::DuplicateRegistration
    }
}

#[derive(Default)]
struct Namespace {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

#[derive(Default)]
pub struct Hub {
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
}

impl Hub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn namespace(&self, namespace: &str) -> Arc<Namespace> {
        if let Some(ns) = self.namespaces.read().await.get(namespace) {
            return ns.clone();
        }
        let mut namespaces = self.namespaces.write().await;
        namespaces.entry(namespace.to_owned()).or_default().clone()
    }

    /// Add a session under `(namespace, instance_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DuplicateRegistration`] when the instance already
    /// has a live session in the namespace. The existing session is kept.
    pub async fn register(&self, namespace: &str, instance_id: &str, session: Arc<Session>) -> Result<(), HubError> {
        let ns = self.namespace(namespace).await;
        let mut sessions = ns.sessions.write().await;
        if sessions.contains_key(instance_id) {
            return Err(HubError::DuplicateRegistration {
                namespace: namespace.to_owned(),
                instance_id: instance_id.to_owned(),
            });
        }
        sessions.insert(instance_id.to_owned(), session);
        info!(namespace, instance_id, "hub: session registered");
        Ok(())
    }

    /// Remove a session. Unknown namespaces or ids are ignored.
    pub async fn unregister(&self, namespace: &str, instance_id: &str) {
        let Some(ns) = self.namespaces.read().await.get(namespace).cloned() else {
            return;
        };
        if ns.sessions.write().await.remove(instance_id).is_some() {
            info!(namespace, instance_id, "hub: session unregistered");
        }
    }

    /// Push a module change to every session of its namespace.
    ///
    /// Returns how many sessions accepted the frame.
    pub async fn notify(&self, event: &ModuleChangeEvent) -> usize {
        let Some(ns) = self.namespaces.read().await.get(&event.namespace).cloned() else {
            return 0;
        };
        let targets: Vec<Arc<Session>> = ns
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.namespace() == Some(event.namespace.as_str()))
            .cloned()
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let bytes = frames::encode_frame(&change_frame(event));
        let delivered = targets.iter().filter(|s| s.push(bytes.clone())).count();
        debug!(
            namespace = %event.namespace,
            module = %event.module_name,
            targets = targets.len(),
            delivered,
            "hub: change broadcast"
        );
        delivered
    }

    /// Number of sessions currently registered in `namespace`.
    pub async fn session_count(&self, namespace: &str) -> usize {
        match self.namespaces.read().await.get(namespace).cloned() {
            Some(ns) => ns.sessions.read().await.len(),
            None => 0,
        }
    }
}

/// `ChangeService` frame describing one module's membership.
#[must_use]
pub fn change_frame(event: &ModuleChangeEvent) -> RoutingFrame {
    let ops = match event.kind {
        ChangeKind::Modify => OpsType::Modify,
        ChangeKind::Delete => OpsType::Delete,
    };
    let info = ModuleInfo {
        namespace: event.namespace.clone(),
        module_name: event.module_name.clone(),
        ops_type: ops as i32,
        instances: event.instances.iter().map(frames::InstanceInfo::from).collect(),
    };
    RoutingFrame::of(FrameType::ChangeService, &info)
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
