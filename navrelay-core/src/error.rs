//! Error types for navrelay-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Station {0} not found")]
    StationNotFound(i64),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Robot bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("Navigation rejected: {0}")]
    NavigationRejected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<mysql_async::Error> for RelayError {
    fn from(err: mysql_async::Error) -> Self {
        RelayError::Storage(err.to_string())
    }
}

impl From<crate::config::ConfigError> for RelayError {
    fn from(err: crate::config::ConfigError) -> Self {
        RelayError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
