//! Client side of the rocky routing layer.
//!
//! A [`RoutingClient`] announces this instance to a routing server and keeps
//! it alive with heartbeats. Change notifications pushed back by the server
//! feed [`Modules`], which resolves a module name to one active instance and
//! hands out command builders bound to that instance's [`PeerSession`].
//!
//! Status frames and change notifications are best-effort: nothing is
//! acknowledged or retried, and a dropped push is repaired by the next change
//! for that module.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod peer;
pub mod resolver;

pub use config::ClientConfig;
pub use error::ClientError;
pub use lifecycle::{RouterAddress, RoutingClient};
pub use peer::{Connector, PeerSession, PeerStream, WsConnector, WsPeerSession};
pub use resolver::{
    ErrorCommand, ForgetCommand, ModuleClient, ModuleDirectory, Modules, RequestCommand, StreamCommand,
};
