//! Frames exchanged on a direct consumer-to-instance module session.
//!
//! Replies correlate to requests by `id`. A request gets exactly one
//! `Response` or `Error`; a stream request gets any number of `StreamItem`
//! frames terminated by `StreamEnd` or `Error`. `Forget` expects no reply.

use prost::Message;

use crate::CodecError;

/// Role of a peer frame in an exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum PeerKind {
    Forget = 0,
    Request = 1,
    Response = 2,
    StreamRequest = 3,
    StreamItem = 4,
    StreamEnd = 5,
    Error = 6,
}

impl PeerKind {
    /// Terminal kinds close a pending exchange.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Response | Self::StreamEnd | Self::Error)
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct PeerFrame {
    /// Correlation id chosen by the requesting side.
    #[prost(uint64, tag = "1")]
    pub id: u64,
    /// Application command number.
    #[prost(int32, tag = "2")]
    pub command: i32,
    #[prost(enumeration = "PeerKind", tag = "3")]
    pub kind: i32,
    /// Application error code; meaningful on `Error` frames only.
    #[prost(int32, tag = "4")]
    pub code: i32,
    #[prost(bytes = "vec", tag = "5")]
    pub payload: Vec<u8>,
}

impl PeerFrame {
    #[must_use]
    pub fn new(id: u64, command: i32, kind: PeerKind, payload: Vec<u8>) -> Self {
        Self { id, command, kind: kind as i32, code: 0, payload }
    }

    /// Parsed frame kind, `None` for values this build does not know.
    #[must_use]
    pub fn peer_kind(&self) -> Option<PeerKind> {
        PeerKind::try_from(self.kind).ok()
    }

    /// Build a reply to this frame with the given kind and payload.
    #[must_use]
    pub fn reply(&self, kind: PeerKind, payload: Vec<u8>) -> Self {
        Self { id: self.id, command: self.command, kind: kind as i32, code: 0, payload }
    }
}

/// Encode a peer frame into length-delimited protobuf bytes.
#[must_use]
pub fn encode_peer(frame: &PeerFrame) -> Vec<u8> {
    frame.encode_length_delimited_to_vec()
}

/// Decode length-delimited protobuf bytes into a peer frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for truncated or malformed bytes.
pub fn decode_peer(bytes: &[u8]) -> Result<PeerFrame, CodecError> {
    Ok(PeerFrame::decode_length_delimited(bytes)?)
}

#[cfg(test)]
#[path = "peer_test.rs"]
mod tests;
