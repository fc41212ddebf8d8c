//! Routing envelope and protobuf codec for the router control plane.
//!
//! This crate owns the wire representation shared by `server` and `client`.
//! Every control message travels inside a [`RoutingFrame`]: a numeric type
//! tag plus opaque payload bytes. The tag is kept as the raw wire integer so
//! that frames of unknown type still decode; deciding what to do with an
//! unknown tag is the dispatcher's job, not the codec's.
//!
//! Frames are written length-delimited (varint length prefix followed by the
//! protobuf body), which is the container the websocket transport carries in
//! each binary message.

mod messages;
mod peer;

pub use messages::{
    DownServiceInfo, ErrorCode, ErrorInfo, HealthIdleInfo, InstanceInfo, ModuleInfo, OpsType, ServiceInfo,
    UpServiceInfo,
};
pub use peer::{PeerFrame, PeerKind, decode_peer, encode_peer};

use prost::Message;
use serde::{Deserialize, Serialize};

/// Error returned by [`decode_frame`] and the typed payload accessors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw bytes could not be decoded as a length-delimited protobuf message.
    #[error("failed to decode protobuf frame: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Known routing frame types.
///
/// `Connect`, `HealthIdle`, `Active` and `Disable` flow from client to
/// server; `ChangeService` and `Error` flow from server to client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, prost::Enumeration)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum FrameType {
    Connect = 0,
    HealthIdle = 1,
    Active = 2,
    Disable = 3,
    ChangeService = 4,
    Error = 5,
}

impl FrameType {
    /// Wire integer for this frame type.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// A single message on the routing control channel.
#[derive(Clone, PartialEq, Message)]
pub struct RoutingFrame {
    /// Raw frame type tag. See [`RoutingFrame::kind`].
    #[prost(int32, tag = "1")]
    pub frame_type: i32,
    /// Embedded message bytes; schema selected by `frame_type`.
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

impl RoutingFrame {
    /// Build a frame from a raw type tag and payload bytes.
    #[must_use]
    pub fn new(frame_type: i32, payload: Vec<u8>) -> Self {
        Self { frame_type, payload }
    }

    /// Build a frame of a known type carrying an encoded protobuf message.
    pub fn of(kind: FrameType, message: &impl Message) -> Self {
        Self { frame_type: kind.as_i32(), payload: message.encode_to_vec() }
    }

    /// Map the raw tag to a known frame type, if any.
    #[must_use]
    pub fn kind(&self) -> Option<FrameType> {
        FrameType::try_from(self.frame_type).ok()
    }

    /// Decode the payload as message type `M`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] when the payload is not a valid `M`.
    pub fn payload_as<M: Message + Default>(&self) -> Result<M, CodecError> {
        Ok(M::decode(self.payload.as_slice())?)
    }
}

/// Encode a frame into length-delimited protobuf bytes.
#[must_use]
pub fn encode_frame(frame: &RoutingFrame) -> Vec<u8> {
    frame.encode_length_delimited_to_vec()
}

/// Decode length-delimited protobuf bytes into a frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for truncated or malformed bytes.
pub fn decode_frame(bytes: &[u8]) -> Result<RoutingFrame, CodecError> {
    Ok(RoutingFrame::decode_length_delimited(bytes)?)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
