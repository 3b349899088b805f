// src/error.rs
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by client calls.
///
/// Transport-level failures are additionally reported to `error` /
/// `disconnect` listeners; everything here is returned to the caller.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A send-action method was called while no connection is open.
    #[error("WebSocket not connected")]
    NotConnected,

    /// A correlated request got no response in time.
    #[error("no `{event}` response within {after:?}")]
    Timeout { event: String, after: Duration },

    /// REST call returned a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The server answered but refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
