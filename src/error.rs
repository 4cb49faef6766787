//! Error types for SOME/IP operations.

use std::io;
use thiserror::Error;

/// Errors that can occur during SOME/IP operations.
#[derive(Error, Debug)]
pub enum SomeIpError {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An argument or message field failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A required component (e.g. an E2E profile) was not initialized.
    #[error("not initialized")]
    NotInitialized,

    /// The transport is not running or the socket is gone.
    #[error("not connected")]
    NotConnected,

    /// An endpoint address was invalid for the requested operation.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Data did not fit the available buffer or datagram.
    #[error("buffer overflow: {size} bytes exceeds maximum of {max} bytes")]
    BufferOverflow { size: usize, max: usize },

    /// A network operation failed.
    #[error("network error: {0}")]
    NetworkError(String),

    /// Operation timed out or data is stale.
    #[error("operation timed out")]
    Timeout,

    /// Received bytes do not form a valid message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A payload exceeds the configured maximum message size.
    #[error("message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type alias for SOME/IP operations.
pub type Result<T> = std::result::Result<T, SomeIpError>;

impl SomeIpError {
    /// Create a new malformed-message error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }

    /// Create a new invalid-argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Check if this error is recoverable (transient).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if e.kind() == io::ErrorKind::WouldBlock
                || e.kind() == io::ErrorKind::TimedOut
                || e.kind() == io::ErrorKind::Interrupted
        ) || matches!(self, Self::Timeout)
    }
}
