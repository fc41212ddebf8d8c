//! Routing session handle.
//!
//! The transport owns the connection; everything else holds an
//! `Arc<Session>` used only to push bytes and to read the tag. Dropping
//! every handle never closes the socket, and closing the socket is reported
//! back through the disconnect hook.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use uuid::Uuid;

/// Identity a session acquires with a successful Connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTag {
    pub instance_id: String,
    pub namespace: String,
    pub modules: Vec<String>,
}

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    outbound: mpsc::Sender<Vec<u8>>,
    /// Held by the one Connect allowed to proceed.
    claimed: AtomicBool,
    tag: OnceLock<SessionTag>,
}

impl Session {
    #[must_use]
    pub fn new(outbound: mpsc::Sender<Vec<u8>>) -> Self {
        Self { id: Uuid::new_v4(), outbound, claimed: AtomicBool::new(false), tag: OnceLock::new() }
    }

    /// Reserve the session for one Connect. Returns `false` while another
    /// Connect holds the claim or after the session was tagged.
    pub fn claim(&self) -> bool {
        self.claimed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Give the claim back after a failed Connect. No effect once tagged.
    pub fn release(&self) {
        if self.tag.get().is_none() {
            self.claimed.store(false, Ordering::Release);
        }
    }

    /// Tag the session. Tagging is terminal; returns `false` if already tagged.
    pub fn tag(&self, tag: SessionTag) -> bool {
        self.tag.set(tag).is_ok()
    }

    #[must_use]
    pub fn tagged(&self) -> Option<&SessionTag> {
        self.tag.get()
    }

    /// Namespace the session connected under, if tagged.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.tag.get().map(|t| t.namespace.as_str())
    }

    /// Queue bytes for the socket writer without waiting.
    ///
    /// Best-effort: a full queue or a closing session drops the bytes.
    pub fn push(&self, bytes: Vec<u8>) -> bool {
        match self.outbound.try_send(bytes) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(session = %self.id, "session: outbound queue full; dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session = %self.id, "session: closed; dropping frame");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
