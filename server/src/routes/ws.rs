//! WebSocket handler: routing session transport.
//!
//! DESIGN
//! ======
//! Each binary message is one length-delimited routing frame. On upgrade the
//! handler creates a [`Session`] around a bounded outbound channel and enters
//! a `select!` loop:
//! - Inbound binary message → spawn one dispatch task into a `JoinSet`
//! - Outbound bytes pushed by dispatch or the hub → forward to the socket
//! - Finished dispatch tasks → reap
//!
//! Dispatch does store I/O, so it never runs on the socket loop itself.
//! Frames from one session may therefore be handled out of order.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → untagged session
//! 2. Connect frame → dispatch tags the session
//! 3. Close → drain in-flight dispatch tasks → disconnect hook
//!
//! Draining first means a Connect still persisting when the socket drops is
//! cleaned up by the hook like any other.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::services::dispatch;
use crate::services::session::Session;
use crate::state::AppState;

/// Outbound frames buffered per session before pushes start dropping.
const OUTBOUND_CAPACITY: usize = 256;

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_CAPACITY);
    let session = Arc::new(Session::new(tx));
    let mut inflight = JoinSet::new();

    info!(session = %session.id, "ws: session opened");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Binary(bytes) => {
                        let state = state.clone();
                        let session = session.clone();
                        inflight.spawn(async move {
                            dispatch::dispatch(&state, &session, &bytes).await;
                        });
                    }
                    Message::Close(_) => break,
                    Message::Text(_) => warn!(session = %session.id, "ws: ignoring text message"),
                    _ => {}
                }
            }
            Some(bytes) = rx.recv() => {
                if socket.send(Message::Binary(bytes.into())).await.is_err() {
                    break;
                }
            }
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = joined {
                    warn!(session = %session.id, error = %e, "ws: dispatch task failed");
                }
            }
        }
    }

    debug!(session = %session.id, pending = inflight.len(), "ws: draining dispatch tasks");
    while let Some(joined) = inflight.join_next().await {
        if let Err(e) = joined {
            warn!(session = %session.id, error = %e, "ws: dispatch task failed");
        }
    }

    dispatch::disconnect(&state, &session).await;
    info!(session = %session.id, "ws: session closed");
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
