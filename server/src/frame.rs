//! Server-side frame construction.
//!
//! DESIGN
//! ======
//! Typed errors never cross the wire as-is. Each error enum implements
//! [`ErrorCode`], which gives it a grepable code for logs and a numeric
//! [`frames::ErrorCode`] for the `Error` frame a client receives.

use frames::{ErrorInfo, FrameType, RoutingFrame};

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and wire code for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn wire_code(&self) -> frames::ErrorCode {
        frames::ErrorCode::Internal
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// `Error` frame for a typed error. The message is prefixed with the grepable code.
#[must_use]
pub fn error_frame(err: &(impl ErrorCode + ?Sized)) -> RoutingFrame {
    let info = ErrorInfo::new(err.wire_code(), format!("{}: {err}", err.error_code()));
    RoutingFrame::of(FrameType::Error, &info)
}

/// [`error_frame`] encoded for the socket.
#[must_use]
pub fn encode_error(err: &(impl ErrorCode + ?Sized)) -> Vec<u8> {
    frames::encode_frame(&error_frame(err))
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
