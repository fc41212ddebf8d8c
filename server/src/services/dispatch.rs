//! Frame dispatcher: routing-protocol handlers for one session.
//!
//! DESIGN
//! ======
//! A session starts untagged. A successful Connect tags it with
//! `(instance_id, namespace, modules)` and the tag never changes. Only one
//! Connect per session may be in flight: it claims the session first and
//! gives the claim back if it fails. Handlers:
//!
//! | Frame         | Needs tag | Effect                                      |
//! |---------------|-----------|---------------------------------------------|
//! | Connect       | no        | claim, key, names, hub, registry, tag, sync |
//! | HealthIdle    | yes       | replace extra; `active` unchanged           |
//! | Active        | yes       | replace extra; `active = true`              |
//! | Disable       | yes       | replace extra; `active = false`             |
//! | anything else | -         | logged and dropped                          |
//!
//! Update frames on an untagged session are silent no-ops: a keep-alive can
//! race ahead of Connect.
//!
//! ERROR HANDLING
//! ==============
//! Nothing here unwinds past one frame. A failed Connect replies with an
//! `Error` frame and leaves the session untagged; every other failure is
//! logged and the frame dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use frames::{CodecError, DownServiceInfo, FrameType, HealthIdleInfo, RoutingFrame, ServiceInfo, UpServiceInfo};
use tracing::{debug, info, warn};

use crate::frame::{ErrorCode, encode_error};
use crate::services::hub::{HubError, change_frame};
use crate::services::registry::{InstanceInfo, RegistryError, check_names};
use crate::services::session::{Session, SessionTag};
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed payload: {0}")]
    Codec(#[from] CodecError),
    #[error("access key rejected for instance {0}")]
    AccessKeyInvalid(String),
    #[error("session already connected; rejecting instance {0}")]
    AlreadyConnected(String),
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ErrorCode for DispatchError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Codec(_) => "E_MALFORMED_PAYLOAD",
            Self::AccessKeyInvalid(_) => "E_ACCESS_KEY_INVALID",
            Self::AlreadyConnected(_) => "E_ALREADY_CONNECTED",
            Self::Hub(e) => e.error_code(),
            Self::Registry(e) => e.error_code(),
        }
    }

    fn wire_code(&self) -> frames::ErrorCode {
        match self {
            Self::AccessKeyInvalid(_) => frames::ErrorCode::AccessKeyInvalid,
            Self::AlreadyConnected(_) => frames::ErrorCode::DuplicateRegistration,
            Self::Hub(e) => e.wire_code(),
            Self::Registry(e) => e.wire_code(),
            Self::Codec(_) => frames::ErrorCode::Internal,
        }
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Decode one inbound binary message and run its handler.
pub async fn dispatch(state: &AppState, session: &Arc<Session>, bytes: &[u8]) {
    let frame = match frames::decode_frame(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(session = %session.id, error = %e, "dispatch: dropping malformed frame");
            return;
        }
    };

    match frame.kind() {
        Some(FrameType::Connect) => {
            if let Err(e) = handle_connect(state, session, &frame).await {
                warn!(session = %session.id, code = e.error_code(), error = %e, "dispatch: connect rejected");
                session.push(encode_error(&e));
            }
        }
        Some(kind @ (FrameType::HealthIdle | FrameType::Active | FrameType::Disable)) => {
            if let Err(e) = handle_update(state, session, kind, &frame).await {
                warn!(session = %session.id, ?kind, code = e.error_code(), error = %e, "dispatch: update failed");
            }
        }
        Some(kind @ (FrameType::ChangeService | FrameType::Error)) => {
            warn!(session = %session.id, ?kind, "dispatch: dropping server-only frame type");
        }
        None => {
            warn!(session = %session.id, frame_type = frame.frame_type, "dispatch: dropping unknown frame type");
        }
    }
}

/// Transport close hook. Prunes a tagged instance from the registry and the hub.
pub async fn disconnect(state: &AppState, session: &Session) {
    let Some(tag) = session.tagged() else {
        debug!(session = %session.id, "dispatch: untagged session closed");
        return;
    };
    if let Err(e) = state.registry.remove_instance(&tag.namespace, &tag.instance_id).await {
        warn!(
            namespace = %tag.namespace,
            instance_id = %tag.instance_id,
            error = %e,
            "dispatch: failed to remove instance on disconnect"
        );
    }
    state.hub.unregister(&tag.namespace, &tag.instance_id).await;
    info!(namespace = %tag.namespace, instance_id = %tag.instance_id, "dispatch: instance disconnected");
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn handle_connect(state: &AppState, session: &Arc<Session>, frame: &RoutingFrame) -> Result<(), DispatchError> {
    let info: ServiceInfo = frame.payload_as()?;
    // Frames run concurrently; only the claim holder touches hub and registry.
    if !session.claim() {
        return Err(DispatchError::AlreadyConnected(info.instance_id));
    }
    let result = connect_claimed(state, session, info).await;
    if result.is_err() {
        session.release();
    }
    result
}

async fn connect_claimed(state: &AppState, session: &Arc<Session>, info: ServiceInfo) -> Result<(), DispatchError> {
    if !state.config.accepts_key(&info.access_key) {
        return Err(DispatchError::AccessKeyInvalid(info.instance_id));
    }
    check_names(&info.namespace, &info.instance_id, &info.modules)?;

    let instance = InstanceInfo {
        profile: info.profile,
        instance_id: info.instance_id,
        ip: info.ip,
        port: info.port,
        active: false,
    };
    let namespace = info.namespace;
    let extra: BTreeMap<String, String> = info.msg.into_iter().collect();

    state.hub.register(&namespace, &instance.instance_id, session.clone()).await?;
    if let Err(e) = state.registry.register_instance(&namespace, &instance, &info.modules, &extra).await {
        state.hub.unregister(&namespace, &instance.instance_id).await;
        return Err(e.into());
    }

    let tagged = session.tag(SessionTag {
        instance_id: instance.instance_id.clone(),
        namespace: namespace.clone(),
        modules: info.modules,
    });
    if !tagged {
        if let Err(e) = state.registry.remove_instance(&namespace, &instance.instance_id).await {
            warn!(%namespace, instance_id = %instance.instance_id, error = %e, "dispatch: connect rollback failed");
        }
        state.hub.unregister(&namespace, &instance.instance_id).await;
        return Err(DispatchError::AlreadyConnected(instance.instance_id));
    }
    info!(session = %session.id, %namespace, instance_id = %instance.instance_id, "dispatch: instance connected");

    sync_namespace(state, session, &namespace).await;
    Ok(())
}

/// Push the current membership of every module in the namespace to a freshly tagged session.
async fn sync_namespace(state: &AppState, session: &Session, namespace: &str) {
    match state.registry.namespace_snapshot(namespace).await {
        Ok(changes) => {
            for change in &changes {
                session.push(frames::encode_frame(&change_frame(change)));
            }
            debug!(session = %session.id, namespace, modules = changes.len(), "dispatch: namespace synced");
        }
        Err(e) => warn!(session = %session.id, namespace, error = %e, "dispatch: namespace sync failed"),
    }
}

async fn handle_update(
    state: &AppState,
    session: &Session,
    kind: FrameType,
    frame: &RoutingFrame,
) -> Result<(), DispatchError> {
    let Some(tag) = session.tagged() else {
        debug!(session = %session.id, ?kind, "dispatch: update before connect ignored");
        return Ok(());
    };

    let (msg, active) = match kind {
        FrameType::Active => (frame.payload_as::<UpServiceInfo>()?.msg, Some(true)),
        FrameType::Disable => (frame.payload_as::<DownServiceInfo>()?.msg, Some(false)),
        _ => (frame.payload_as::<HealthIdleInfo>()?.msg, None),
    };
    let extra: BTreeMap<String, String> = msg.into_iter().collect();

    state.registry.update_instance(&tag.namespace, &tag.instance_id, &extra, active).await?;
    debug!(namespace = %tag.namespace, instance_id = %tag.instance_id, ?kind, "dispatch: instance updated");
    Ok(())
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod tests;
