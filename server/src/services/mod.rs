//! Routing services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own registry and notification logic so route handlers can
//! stay focused on transport plumbing. `dispatch` is the only module that
//! touches all three of session, hub and registry.

pub mod dispatch;
pub mod hub;
pub mod registry;
pub mod session;
