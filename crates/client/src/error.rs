//! Error types for relay sessions and the pool.

use thiserror::Error;

use crate::message::MessageError;

/// Errors that can occur in client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid relay URL: {0}")]
    InvalidUrl(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("message error: {0}")]
    Message(#[from] MessageError),

    #[error("operation timed out")]
    Timeout,

    #[error("not connected to relay")]
    NotConnected,

    #[error("already connected to relay")]
    AlreadyConnected,

    #[error("invalid event: {0}")]
    InvalidEvent(String),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
