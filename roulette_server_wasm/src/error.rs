//! Error types for the signaling relay

use thiserror::Error;

/// Errors raised while serving a connection
#[derive(Error, Debug)]
pub enum SignalingError {
    /// The connection is not registered (never connected, or already reaped)
    #[error("Unknown peer")]
    UnknownPeer,

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Another instance held the state file for too long
    #[error("State is busy, try again")]
    StateLocked,

    /// Reading or writing the state file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from client requests
#[derive(Error, Debug)]
pub enum ClientRequestError {
    /// The `X-Peer-Id` header is absent or not a valid id
    #[error("Missing or invalid X-Peer-Id header")]
    MissingPeerId,

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
