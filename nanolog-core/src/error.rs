//! Error types for NanoLog

use thiserror::Error;

/// Result type alias for NanoLog operations
pub type Result<T> = std::result::Result<T, NanoError>;

/// NanoLog error types
#[derive(Error, Debug)]
pub enum NanoError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Segment corruption detected (bad magic, short file, length mismatch)
    #[error("corrupt segment: {0}")]
    Corruption(String),

    /// Invalid data format
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Compression/decompression error
    #[error("compression error: {0}")]
    Compression(String),

    /// Query execution error
    #[error("query error: {0}")]
    Query(String),

    /// Query language syntax error
    #[error("syntax error: {0}")]
    Syntax(String),

    /// WAL recovery error
    #[error("WAL recovery error: {0}")]
    WalRecovery(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl NanoError {
    /// Check if error indicates a corrupt on-disk file
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            NanoError::Corruption(_) | NanoError::InvalidFormat(_) | NanoError::Compression(_)
        )
    }

    /// Check if error is a query syntax error (maps to HTTP 400)
    pub fn is_syntax(&self) -> bool {
        matches!(self, NanoError::Syntax(_))
    }
}
