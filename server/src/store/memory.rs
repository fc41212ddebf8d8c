//! In-process coordination store.
//!
//! DESIGN
//! ======
//! Nodes live in a `BTreeMap` keyed by absolute path so that children of a
//! node are a contiguous key range. Semantics follow ZooKeeper closely enough
//! for the registry: parents must exist before children, non-empty nodes
//! cannot be deleted, ephemeral nodes cannot have children, and every
//! ephemeral node disappears when the session is closed.
//!
//! Watchers are unbounded channels so that firing an event never blocks a
//! writer. Events are sent after the mutation is applied and while the lock
//! is still held, so a watcher never observes an event before the state it
//! describes.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use super::{CoordinationStore, CreateMode, StoreError, WatchEvent, WatchEventKind, parent_path};

struct Node {
    data: Vec<u8>,
    mode: CreateMode,
}

struct Watch {
    root: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl Watch {
    fn covers(&self, path: &str) -> bool {
        if self.root == "/" {
            return true;
        }
        path == self.root || path.strip_prefix(self.root.as_str()).is_some_and(|rest| rest.starts_with('/'))
    }
}

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<String, Node>,
    watches: Vec<Watch>,
    closed: bool,
}

impl Inner {
    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed { Err(StoreError::Closed) } else { Ok(()) }
    }

    fn exists(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    fn child_names(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" { "/".to_owned() } else { format!("{path}/") };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.contains('/')).then(|| rest.to_owned())
            })
            .collect()
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = if path == "/" { "/".to_owned() } else { format!("{path}/") };
        self.nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix))
    }

    fn fire(&mut self, kind: WatchEventKind, path: &str) {
        self.watches.retain(|w| !w.tx.is_closed());
        for watch in &self.watches {
            if watch.covers(path) {
                let _ = watch.tx.send(WatchEvent { kind, path: path.to_owned() });
            }
        }
    }
}

/// Single-session in-memory [`CoordinationStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate(path: &str) -> Result<(), StoreError> {
    let valid = path.starts_with('/') && (path == "/" || (!path.ends_with('/') && !path.contains("//")));
    if valid { Ok(()) } else { Err(StoreError::InvalidPath(path.to_owned())) }
}

#[async_trait::async_trait]
impl CoordinationStore for MemoryStore {
    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        validate(path)?;
        let inner = self.lock();
        inner.check_open()?;
        Ok(inner.exists(path))
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<(), StoreError> {
        validate(path)?;
        let mut inner = self.lock();
        inner.check_open()?;
        if inner.exists(path) {
            return Err(StoreError::NodeExists(path.to_owned()));
        }
        let parent = parent_path(path).unwrap_or("/");
        if parent != "/" {
            match inner.nodes.get(parent) {
                None => return Err(StoreError::NoParent(path.to_owned())),
                Some(node) if node.mode == CreateMode::Ephemeral => {
                    return Err(StoreError::EphemeralParent(path.to_owned()));
                }
                Some(_) => {}
            }
        }
        inner.nodes.insert(path.to_owned(), Node { data: data.to_vec(), mode });
        inner.fire(WatchEventKind::NodeCreated, path);
        Ok(())
    }

    async fn get_data(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        validate(path)?;
        let inner = self.lock();
        inner.check_open()?;
        inner
            .nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| StoreError::NoNode(path.to_owned()))
    }

    async fn set_data(&self, path: &str, data: &[u8]) -> Result<(), StoreError> {
        validate(path)?;
        let mut inner = self.lock();
        inner.check_open()?;
        let Some(node) = inner.nodes.get_mut(path) else {
            return Err(StoreError::NoNode(path.to_owned()));
        };
        node.data = data.to_vec();
        inner.fire(WatchEventKind::NodeDataChanged, path);
        Ok(())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        validate(path)?;
        let inner = self.lock();
        inner.check_open()?;
        if !inner.exists(path) {
            return Err(StoreError::NoNode(path.to_owned()));
        }
        Ok(inner.child_names(path))
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        validate(path)?;
        let mut inner = self.lock();
        inner.check_open()?;
        if !inner.nodes.contains_key(path) {
            return Err(StoreError::NoNode(path.to_owned()));
        }
        if inner.has_children(path) {
            return Err(StoreError::NotEmpty(path.to_owned()));
        }
        inner.nodes.remove(path);
        inner.fire(WatchEventKind::NodeDeleted, path);
        Ok(())
    }

    async fn watch_recursive(&self, path: &str) -> Result<mpsc::UnboundedReceiver<WatchEvent>, StoreError> {
        validate(path)?;
        let mut inner = self.lock();
        inner.check_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.watches.push(Watch { root: path.to_owned(), tx });
        debug!(path, "store: recursive watch installed");
        Ok(rx)
    }

    async fn close(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        let ephemeral: Vec<String> = inner
            .nodes
            .iter()
            .filter(|(_, node)| node.mode == CreateMode::Ephemeral)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ephemeral {
            inner.nodes.remove(path);
            inner.fire(WatchEventKind::NodeDeleted, path);
        }
        inner.closed = true;
        inner.watches.clear();
        debug!(removed = ephemeral.len(), "store: session closed");
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
