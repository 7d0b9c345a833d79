use thiserror::Error;

/// Errors produced by the docdb driver
#[derive(Debug, Clone, Error)]
pub enum DocDbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Value out of range: {message}")]
    OutOfRange { message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Operation timed out: {message}")]
    Timeout { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DocDbError {
    /// Whether this error describes the remote node's health rather than a
    /// programming mistake on the caller's side.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DocDbError::Network { .. } | DocDbError::Protocol { .. } | DocDbError::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for DocDbError {
    fn from(e: serde_json::Error) -> Self {
        DocDbError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for DocDbError {
    fn from(e: std::io::Error) -> Self {
        DocDbError::Network {
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DocDbError>;
