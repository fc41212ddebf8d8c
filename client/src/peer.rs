//! Direct consumer-to-instance module sessions.
//!
//! DESIGN
//! ======
//! A [`PeerSession`] carries [`PeerFrame`] traffic to one resolved instance.
//! The websocket binding splits the socket into two byte channels and hands
//! them to [`WsPeerSession::attach`], which owns the correlation table:
//! every request or stream request gets a fresh frame id, and replies are
//! routed back by that id (oneshot for requests, mpsc for streams).
//!
//! ERROR HANDLING
//! ==============
//! An `Error` reply surfaces as [`ClientError::Remote`]. When the inbound
//! side ends, every pending exchange resolves to [`ClientError::Closed`].
//! There is no per-command timeout; callers wrap commands in
//! `tokio::time::timeout` themselves.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use frames::{InstanceInfo, PeerFrame, PeerKind};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_tungstenite::tungstenite::Message;

use crate::error::ClientError;

/// Items of an open stream. The channel closes after `StreamEnd`.
pub type PeerStream = mpsc::Receiver<Result<Vec<u8>, ClientError>>;

const CHANNEL_CAPACITY: usize = 256;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Send a frame that expects no reply.
    async fn send(&self, frame: PeerFrame) -> Result<(), ClientError>;

    /// Send a request and wait for its single reply payload.
    async fn call(&self, frame: PeerFrame) -> Result<Vec<u8>, ClientError>;

    /// Send a stream request and return the channel of its items.
    async fn open_stream(&self, frame: PeerFrame) -> Result<PeerStream, ClientError>;

    async fn close(&self);
}

/// Opens a [`PeerSession`] to an instance serving `module`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, instance: &InstanceInfo, module: &str) -> Result<Arc<dyn PeerSession>, ClientError>;
}

// =============================================================================
// WEBSOCKET CONNECTOR
// =============================================================================

/// Dials `ws://{ip}:{port}/rocky/peer/{module}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[must_use]
pub fn peer_url(instance: &InstanceInfo, module: &str) -> String {
    format!("ws://{}:{}/rocky/peer/{module}", instance.ip, instance.port)
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, instance: &InstanceInfo, module: &str) -> Result<Arc<dyn PeerSession>, ClientError> {
        let url = peer_url(instance, module);
        let (ws, _) = connect_async(url.as_str()).await?;
        tracing::debug!(%url, instance_id = %instance.instance_id, "peer session connected");

        let (outbound, inbound, pumps) = spawn_ws_pumps(ws);
        let session = WsPeerSession::attach(outbound, inbound);
        session.tasks.lock().await.extend(pumps);
        Ok(session)
    }
}

/// Bridge a websocket to a pair of byte channels.
///
/// Binary messages flow both ways; text and control frames are ignored.
pub(crate) fn spawn_ws_pumps(ws: WsStream) -> (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>, [JoinHandle<()>; 2]) {
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(bytes) = out_rx.recv().await {
            if let Err(e) = sink.send(Message::Binary(bytes.into())).await {
                tracing::warn!(error = %e, "websocket send failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Binary(bytes)) => {
                    if in_tx.send(bytes.to_vec()).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "websocket receive failed");
                    break;
                }
            }
        }
    });

    (out_tx, in_rx, [writer, reader])
}

// =============================================================================
// SESSION
// =============================================================================

enum Pending {
    Call(oneshot::Sender<Result<Vec<u8>, ClientError>>),
    Stream(mpsc::Sender<Result<Vec<u8>, ClientError>>),
}

type PendingMap = Arc<Mutex<HashMap<u64, Pending>>>;

pub struct WsPeerSession {
    outbound: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    pending: PendingMap,
    next_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WsPeerSession {
    /// Run the peer protocol over a pair of byte channels.
    #[must_use]
    pub fn attach(outbound: mpsc::Sender<Vec<u8>>, inbound: mpsc::Receiver<Vec<u8>>) -> Arc<Self> {
        let pending: PendingMap = Arc::default();
        let reader = tokio::spawn(route_replies(inbound, pending.clone()));
        Arc::new(Self {
            outbound: Mutex::new(Some(outbound)),
            pending,
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(vec![reader]),
        })
    }

    async fn write(&self, frame: &PeerFrame) -> Result<(), ClientError> {
        let sender = self.outbound.lock().await.clone().ok_or(ClientError::Closed)?;
        sender.send(frames::encode_peer(frame)).await.map_err(|_| ClientError::Closed)
    }

    async fn register(&self, mut frame: PeerFrame, pending: Pending) -> Result<(), ClientError> {
        frame.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().await.insert(frame.id, pending);
        if let Err(e) = self.write(&frame).await {
            self.pending.lock().await.remove(&frame.id);
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl PeerSession for WsPeerSession {
    async fn send(&self, frame: PeerFrame) -> Result<(), ClientError> {
        self.write(&frame).await
    }

    async fn call(&self, frame: PeerFrame) -> Result<Vec<u8>, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.register(frame, Pending::Call(tx)).await?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    async fn open_stream(&self, frame: PeerFrame) -> Result<PeerStream, ClientError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.register(frame, Pending::Stream(tx)).await?;
        Ok(rx)
    }

    async fn close(&self) {
        self.outbound.lock().await.take();
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        fail_pending(&self.pending).await;
    }
}

async fn route_replies(mut inbound: mpsc::Receiver<Vec<u8>>, pending: PendingMap) {
    while let Some(bytes) = inbound.recv().await {
        let frame = match frames::decode_peer(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed peer frame");
                continue;
            }
        };
        let Some(kind) = frame.peer_kind() else {
            tracing::warn!(id = frame.id, kind = frame.kind, "dropping peer frame of unknown kind");
            continue;
        };

        let mut map = pending.lock().await;
        match (kind, map.remove(&frame.id)) {
            (PeerKind::Response, Some(Pending::Call(tx))) => {
                let _ = tx.send(Ok(frame.payload));
            }
            (PeerKind::Error, Some(Pending::Call(tx))) => {
                let _ = tx.send(Err(remote_error(&frame)));
            }
            (PeerKind::StreamItem, Some(Pending::Stream(tx))) => {
                let item = tx.clone();
                map.insert(frame.id, Pending::Stream(tx));
                drop(map);
                if item.send(Ok(frame.payload)).await.is_err() {
                    pending.lock().await.remove(&frame.id);
                }
            }
            (PeerKind::Error, Some(Pending::Stream(tx))) => {
                drop(map);
                let _ = tx.send(Err(remote_error(&frame))).await;
            }
            (PeerKind::StreamEnd, Some(Pending::Stream(_))) => {}
            (kind, Some(entry)) if !kind.is_terminal() => {
                map.insert(frame.id, entry);
                tracing::debug!(id = frame.id, ?kind, "ignoring non-reply peer frame");
            }
            (kind, _) => {
                tracing::debug!(id = frame.id, ?kind, "dropping uncorrelated peer frame");
            }
        }
    }
    fail_pending(&pending).await;
}

async fn fail_pending(pending: &PendingMap) {
    for (_, entry) in pending.lock().await.drain() {
        match entry {
            Pending::Call(tx) => {
                let _ = tx.send(Err(ClientError::Closed));
            }
            Pending::Stream(tx) => {
                let _ = tx.try_send(Err(ClientError::Closed));
            }
        }
    }
}

fn remote_error(frame: &PeerFrame) -> ClientError {
    ClientError::Remote { code: frame.code, message: String::from_utf8_lossy(&frame.payload).into_owned() }
}

#[cfg(test)]
#[path = "peer_test.rs"]
mod tests;
