//! Error types for the RS-485 bridge.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors raised while running the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Zenoh session error.
    #[error("Zenoh error: {0}")]
    Zenoh(#[from] zenoh::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Publishing error.
    #[error("Failed to publish to {key}: {message}")]
    Publish { key: String, message: String },

    /// Master engine error.
    #[error("RS485 master error: {0}")]
    Master(#[from] rs485_master::MasterError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for BridgeError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for BridgeError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}
