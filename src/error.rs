//! Error types for buslink.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Failure reported by the underlying transport, carrying its message text.
    #[error("{0}")]
    Transport(String),

    #[error("Unable to find D-Bus session for user {uid}")]
    NotFound { uid: u32 },

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BusError {
    pub fn transport(message: impl std::fmt::Display) -> Self {
        BusError::Transport(message.to_string())
    }
}

impl From<zbus::Error> for BusError {
    fn from(err: zbus::Error) -> Self {
        BusError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
