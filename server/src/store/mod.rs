//! Coordination store seam.
//!
//! ARCHITECTURE
//! ============
//! The router keeps its durable topology in a hierarchical coordination store
//! (ZooKeeper-style nodes, ephemeral-on-disconnect leaves, persistent
//! recursive watches). The registry only talks to the [`CoordinationStore`]
//! trait so the backend can be swapped; [`memory::MemoryStore`] is the
//! in-process backend used for standalone deployments and tests.
//!
//! Watch delivery is at-least-once and events for unrelated nodes may arrive
//! in any order. Consumers re-read state on every event rather than trusting
//! event payloads.

pub mod memory;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::StoreConfig;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("node already exists: {0}")]
    NodeExists(String),
    #[error("node does not exist: {0}")]
    NoNode(String),
    #[error("node has children: {0}")]
    NotEmpty(String),
    #[error("parent node does not exist: {0}")]
    NoParent(String),
    #[error("ephemeral nodes cannot have children: {0}")]
    EphemeralParent(String),
    #[error("invalid node path: {0}")]
    InvalidPath(String),
    #[error("store session closed")]
    Closed,
    #[error("unsupported store hosts: {0}")]
    Unsupported(String),
}

/// Persistence mode of a created node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creating session.
    Persistent,
    /// Removed when the creating session ends.
    Ephemeral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
}

/// A change observed under a watched subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: String,
}

/// Hierarchical node store with ephemeral nodes and recursive watches.
#[async_trait::async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool, StoreError>;

    /// Create a single node. The parent must already exist.
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<(), StoreError>;

    async fn get_data(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    async fn set_data(&self, path: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Child node names (last path segment only), sorted.
    async fn children(&self, path: &str) -> Result<Vec<String>, StoreError>;

    /// Delete a node. Fails with [`StoreError::NotEmpty`] if it has children.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Install a persistent recursive watch on `path` and every descendant.
    ///
    /// The receiver yields events until the store session closes.
    async fn watch_recursive(&self, path: &str) -> Result<mpsc::UnboundedReceiver<WatchEvent>, StoreError>;

    /// End the store session, removing every ephemeral node it created.
    async fn close(&self);
}

// =============================================================================
// HELPERS
// =============================================================================

/// Open the store backend named by `config.hosts`.
///
/// # Errors
///
/// Returns [`StoreError::Unsupported`] when no backend matches the hosts string.
pub fn open(config: &StoreConfig) -> Result<Arc<dyn CoordinationStore>, StoreError> {
    match config.hosts.trim() {
        "" | "memory" | "mem://" => {
            info!(session_timeout_ms = config.session_timeout_ms, "store: using in-memory coordination store");
            Ok(Arc::new(memory::MemoryStore::new()))
        }
        other => Err(StoreError::Unsupported(other.to_owned())),
    }
}

/// Join a root path and relative segments into an absolute node path.
///
/// The root is normalized; segments are appended verbatim, one node each.
/// Callers pass only names accepted by [`is_node_name`].
#[must_use]
pub fn join_path(root: &str, segments: &[&str]) -> String {
    let mut path = String::new();
    for part in root.split('/').filter(|p| !p.is_empty()) {
        path.push('/');
        path.push_str(part);
    }
    for segment in segments {
        path.push('/');
        path.push_str(segment);
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

/// Whether `name` can stand as a single node below a parent.
#[must_use]
pub fn is_node_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/')
}

/// Parent path of an absolute node path. `None` for the root.
#[must_use]
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    let (parent, _) = path.rsplit_once('/')?;
    Some(if parent.is_empty() { "/" } else { parent })
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
