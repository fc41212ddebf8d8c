//! Client error taxonomy.

/// Error type for routing client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The module has no active instance, or the chosen instance went inactive.
    #[error("no active instance for module {0}")]
    ServiceUnavailable(String),
    /// The module was never announced to this client.
    #[error("unknown module {0}")]
    UnknownModule(String),
    /// Discovery returned no routing server.
    #[error("no routing server available")]
    RouterUnavailable,
    /// Configuration could not be parsed.
    #[error("invalid value for {var}: {value}")]
    Config { var: &'static str, value: String },
    /// A discovery HTTP request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The websocket connection or handshake failed.
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    /// A peer session could not be established.
    #[error("connect failed: {0}")]
    Connect(String),
    /// A binary frame could not be decoded.
    #[error("frame decode failed: {0}")]
    Decode(#[from] frames::CodecError),
    /// The session closed before the exchange finished.
    #[error("session closed")]
    Closed,
    /// The remote side answered with an `Error` frame.
    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
