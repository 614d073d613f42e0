//! Error types for the solvr-client crate.

use std::time::Duration;

use solvr_protocol::{CodecError, EncodeError};

use crate::connection::Endpoint;

/// Errors from [`ConnectionManager::connect`](crate::ConnectionManager::connect)
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Already connected or connecting to {0}")]
    AlreadyConnected(Endpoint),

    #[error("Server {endpoint} is unreachable: {source}")]
    Unreachable {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("Connecting to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: Endpoint, timeout: Duration },

    #[error("Connection attempt to {0} was cancelled")]
    Cancelled(Endpoint),
}

/// Errors from [`ConnectionManager::send`](crate::ConnectionManager::send)
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Not connected to the server")]
    NotConnected,

    #[error("Invalid command: {0}")]
    Encode(#[from] EncodeError),

    #[error("Write timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CodecError> for SendError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(e) => Self::Io(e),
            CodecError::Encode(e) => Self::Encode(e),
            CodecError::FrameTooLarge(size) => Self::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("command too large: {size} bytes"),
            )),
        }
    }
}

/// Errors from [`ConnectionManager::request`](crate::ConnectionManager::request)
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Send(#[from] SendError),

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Connection closed before a response arrived")]
    ConnectionClosed,
}

/// Errors from loading or saving configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid endpoint '{0}': expected host:port")]
    InvalidEndpoint(String),
}

/// Unified error type for client operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
