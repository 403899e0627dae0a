//! Error types for navrelay-bridge

use navrelay_core::RelayError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("robot bridge is not connected")]
    Unavailable,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid bridge URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BridgeError::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

impl From<BridgeError> for RelayError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::InvalidRequest(msg) => RelayError::Protocol(msg),
            other => RelayError::BridgeUnavailable(other.to_string()),
        }
    }
}
