//! Common error types for Lockbox.

use thiserror::Error;

/// Top-level error type for Lockbox operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input provided. Always reported before any side effect.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested secret does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The user abandoned an authentication challenge.
    #[error("Authentication cancelled")]
    AuthenticationCancelled,

    /// Wrong passphrase, challenge mismatch or platform rejection.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Cryptographic primitive reported failure.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// An authentication tag did not verify.
    #[error("Tamper detected: {0}")]
    TamperDetected(String),

    /// Unknown version, truncated stream or trailing data.
    #[error("Format error: {0}")]
    Format(String),

    /// Persistent storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse classification of [`Error`], for callers that branch on the kind of
/// failure rather than its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AuthenticationCancelled,
    AuthenticationFailed,
    CryptoFailure,
    TamperDetected,
    FormatError,
    StorageFailure,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AuthenticationCancelled => ErrorKind::AuthenticationCancelled,
            Error::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            Error::Crypto(_) => ErrorKind::CryptoFailure,
            Error::TamperDetected(_) => ErrorKind::TamperDetected,
            Error::Format(_) => ErrorKind::FormatError,
            Error::Storage(_) | Error::Io(_) | Error::Serialization(_) => {
                ErrorKind::StorageFailure
            }
        }
    }

    /// Wrap this error as a storage failure with context, unless it already
    /// carries a more specific classification.
    pub fn in_storage(self, context: &str) -> Self {
        match self {
            Error::Io(e) => Error::Storage(format!("{}: {}", context, e)),
            Error::Serialization(e) => Error::Storage(format!("{}: {}", context, e)),
            other => other,
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
