//! # Session Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Ids must match `[A-Za-z0-9_-]{1,128}`
    #[error("Invalid session id: {id:?}")]
    InvalidId { id: String },

    #[error("Session record {id} is unreadable: {message}")]
    Corrupt { id: String, message: String },

    #[error("Storage error: {message}")]
    Other { message: String },
}

impl SessionError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
