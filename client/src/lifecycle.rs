//! Routing client start-up, heartbeat and shutdown.
//!
//! LIFECYCLE
//! =========
//! [`RoutingClient::start`] performs, in order and without retries:
//!
//! 1. `GET {router_url}/rocky/routers`; an empty list is
//!    [`ClientError::RouterUnavailable`].
//! 2. Pick one router at random and open `ws://{ip}:{port}/rocky/ws`.
//! 3. Send `Connect` with this instance's identity and module list.
//! 4. Mark the client active and start the `HealthIdle` heartbeat. The
//!    first beat follows Connect immediately, then one per period.
//!
//! [`RoutingClient::attach`] runs steps 3 and 4 over any pair of byte
//! channels; the websocket is one binding of it.
//!
//! `close()` stops the heartbeat and pumps and clears the active flag. After
//! that, or before start-up finishes, `health`/`active`/`inactive` are logged
//! no-ops.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use frames::{DownServiceInfo, ErrorInfo, FrameType, HealthIdleInfo, ModuleInfo, RoutingFrame, UpServiceInfo};
use rand::seq::IndexedRandom;
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::peer::{Connector, spawn_ws_pumps};
use crate::resolver::Modules;

/// A routing server address as published by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouterAddress {
    pub ip: String,
    pub port: u16,
}

struct Shared {
    active: AtomicBool,
    outbound: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    extra: Mutex<HashMap<String, String>>,
}

impl Shared {
    /// Send a routing frame if the client is active. Returns whether it was sent.
    async fn send_if_active(&self, frame: &RoutingFrame) -> Result<bool, ClientError> {
        if !self.active.load(Ordering::Acquire) {
            return Ok(false);
        }
        let Some(sender) = self.outbound.lock().await.clone() else {
            return Ok(false);
        };
        sender.send(frames::encode_frame(frame)).await.map_err(|_| ClientError::Closed)?;
        Ok(true)
    }

    async fn extra(&self) -> HashMap<String, String> {
        self.extra.lock().await.clone()
    }
}

pub struct RoutingClient {
    config: ClientConfig,
    http: reqwest::Client,
    modules: Arc<Modules>,
    shared: Arc<Shared>,
    changes: watch::Sender<u64>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RoutingClient {
    #[must_use]
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let modules = Arc::new(Modules::new(&config.instance_id, connector));
        let (changes, _) = watch::channel(0);
        Self {
            config,
            http: reqwest::Client::new(),
            modules,
            shared: Arc::new(Shared {
                active: AtomicBool::new(false),
                outbound: Mutex::new(None),
                extra: Mutex::new(HashMap::new()),
            }),
            changes,
            tasks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Module directories fed by this client's change notifications.
    #[must_use]
    pub fn modules(&self) -> &Arc<Modules> {
        &self.modules
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Counter bumped after every applied change notification.
    #[must_use]
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Fetch the published routing servers.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Http`] when the request or JSON decode fails.
    pub async fn discover(&self) -> Result<Vec<RouterAddress>, ClientError> {
        let routers = self.http.get(self.config.routers_url()).send().await?.error_for_status()?.json().await?;
        Ok(routers)
    }

    /// Discover a router, connect to it and announce this instance.
    ///
    /// # Errors
    ///
    /// Any failing step aborts start-up; nothing is retried.
    pub async fn start(&self) -> Result<(), ClientError> {
        self.check_heartbeat()?;
        let routers = self.discover().await?;
        let router = routers.choose(&mut rand::rng()).ok_or(ClientError::RouterUnavailable)?;
        let url = format!("ws://{}:{}/rocky/ws", router.ip, router.port);

        let (ws, _) = connect_async(url.as_str()).await?;
        tracing::info!(%url, instance_id = %self.config.instance_id, "routing session opened");

        let (outbound, inbound, pumps) = spawn_ws_pumps(ws);
        self.tasks.lock().await.extend(pumps);
        self.attach(outbound, inbound).await
    }

    /// Run the routing protocol over a pair of byte channels.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] for a zero heartbeat period, before
    /// anything is sent, and [`ClientError::Closed`] when `outbound` is
    /// already closed.
    pub async fn attach(
        &self,
        outbound: mpsc::Sender<Vec<u8>>,
        inbound: mpsc::Receiver<Vec<u8>>,
    ) -> Result<(), ClientError> {
        self.check_heartbeat()?;
        let mut connect = self.config.service_info();
        connect.msg = self.shared.extra().await;
        outbound
            .send(frames::encode_frame(&RoutingFrame::of(FrameType::Connect, &connect)))
            .await
            .map_err(|_| ClientError::Closed)?;

        *self.shared.outbound.lock().await = Some(outbound);
        self.shared.active.store(true, Ordering::Release);

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(apply_changes(inbound, self.modules.clone(), self.shared.clone(), self.changes.clone())));
        tasks.push(tokio::spawn(heartbeat(self.shared.clone(), self.config.heartbeat)));
        tracing::info!(
            namespace = %self.config.namespace,
            instance_id = %self.config.instance_id,
            modules = ?self.config.modules,
            "connect sent"
        );
        Ok(())
    }

    fn check_heartbeat(&self) -> Result<(), ClientError> {
        if self.config.heartbeat.is_zero() {
            return Err(ClientError::Config { var: "heartbeat", value: format!("{:?}", self.config.heartbeat) });
        }
        Ok(())
    }

    /// Replace the extra metadata carried by the next status frame.
    pub async fn set_extra(&self, extra: HashMap<String, String>) {
        *self.shared.extra.lock().await = extra;
    }

    /// Send a `HealthIdle` now. No-op when not active.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] when the routing session is gone.
    pub async fn health(&self) -> Result<(), ClientError> {
        let frame = RoutingFrame::of(FrameType::HealthIdle, &HealthIdleInfo { msg: self.shared.extra().await });
        self.send_status(&frame, "health").await
    }

    /// Announce that this instance accepts module traffic.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] when the routing session is gone.
    pub async fn active(&self) -> Result<(), ClientError> {
        let frame = RoutingFrame::of(FrameType::Active, &UpServiceInfo { msg: self.shared.extra().await });
        self.send_status(&frame, "active").await
    }

    /// Announce that this instance stops accepting module traffic.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] when the routing session is gone.
    pub async fn inactive(&self) -> Result<(), ClientError> {
        let frame = RoutingFrame::of(FrameType::Disable, &DownServiceInfo { msg: self.shared.extra().await });
        self.send_status(&frame, "inactive").await
    }

    async fn send_status(&self, frame: &RoutingFrame, action: &'static str) -> Result<(), ClientError> {
        if !self.shared.send_if_active(frame).await? {
            tracing::warn!(action, "routing client not active; ignoring");
        }
        Ok(())
    }

    /// Stop the heartbeat, drop the routing session and close peer sessions.
    pub async fn close(&self) {
        self.shared.active.store(false, Ordering::Release);
        self.shared.outbound.lock().await.take();
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.modules.clear().await;
        tracing::info!(instance_id = %self.config.instance_id, "routing client closed");
    }
}

/// The first beat goes out right after Connect, then one per `period`.
async fn heartbeat(shared: Arc<Shared>, period: std::time::Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let frame = RoutingFrame::of(FrameType::HealthIdle, &HealthIdleInfo { msg: shared.extra().await });
        match shared.send_if_active(&frame).await {
            Ok(true) => tracing::trace!("heartbeat sent"),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "heartbeat failed; stopping");
                return;
            }
        }
    }
}

async fn apply_changes(
    mut inbound: mpsc::Receiver<Vec<u8>>,
    modules: Arc<Modules>,
    shared: Arc<Shared>,
    changes: watch::Sender<u64>,
) {
    while let Some(bytes) = inbound.recv().await {
        let frame = match frames::decode_frame(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed routing frame");
                continue;
            }
        };
        match frame.kind() {
            Some(FrameType::ChangeService) => match frame.payload_as::<ModuleInfo>() {
                Ok(change) => {
                    tracing::debug!(
                        module = %change.module_name,
                        ops = ?change.ops(),
                        instances = change.instances.len(),
                        "module change received"
                    );
                    modules.apply(&change).await;
                    changes.send_modify(|n| *n += 1);
                }
                Err(e) => tracing::warn!(error = %e, "dropping malformed change payload"),
            },
            Some(FrameType::Error) => match frame.payload_as::<ErrorInfo>() {
                Ok(err) => tracing::error!(code = ?err.error_code(), message = %err.message, "router rejected request"),
                Err(e) => tracing::warn!(error = %e, "dropping malformed error payload"),
            },
            other => tracing::warn!(frame_type = frame.frame_type, kind = ?other, "dropping unexpected routing frame"),
        }
    }
    shared.active.store(false, Ordering::Release);
    tracing::warn!("routing session ended");
}

#[cfg(test)]
#[path = "lifecycle_test.rs"]
mod tests;
