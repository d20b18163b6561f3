//! Error types for the live update pipeline.
//!
//! None of these are fatal: the supervisor turns channel errors into a
//! reconnect, and a failed refresh leaves the previous snapshot in place.

use thiserror::Error;

/// Transport-level failures on the push channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    Closed,

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ChannelError {
    pub fn connect(msg: impl Into<String>) -> Self {
        Self::Connect(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Closed,
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Failures fetching the project list over REST.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Project source unavailable: {0}")]
    Unavailable(String),
}
