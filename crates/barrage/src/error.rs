//! Barrage error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, BarrageError>;

/// Errors that can occur while collecting barrage streams.
#[derive(Error, Debug)]
pub enum BarrageError {
    /// Socket failure. Fatal to the room's current connection only.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// HTTP/parse failure during out-of-band negotiation. Recoverable:
    /// the room is retried on the next rescan.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Unknown or malformed room id. Fatal: the room is deregistered.
    #[error("bad room: {0}")]
    BadRoom(String),

    /// Malformed inbound payload. Absorbed locally, the record is dropped.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No platform client accepts the URL. Fatal to that single add call.
    #[error("unsupported url: {0}")]
    UnsupportedUrl(String),
}

impl BarrageError {
    /// Create a negotiation error.
    pub fn negotiation(msg: impl Into<String>) -> Self {
        Self::Negotiation(msg.into())
    }

    /// Create a bad-room error.
    pub fn bad_room(msg: impl Into<String>) -> Self {
        Self::BadRoom(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether a room worker ending with this error should be retried on
    /// the next rescan instead of being deregistered.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Negotiation(_))
    }
}

impl From<reqwest::Error> for BarrageError {
    fn from(err: reqwest::Error) -> Self {
        Self::Negotiation(err.to_string())
    }
}
