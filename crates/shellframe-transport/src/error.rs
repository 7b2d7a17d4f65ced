//! Transport error types

use shellframe_proto::EncodeError;
use std::io;
use thiserror::Error;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// Credentials were rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Fault reported by the remote service.
    ///
    /// Seen after a service restart invalidates the shell the client holds,
    /// among other causes that cannot be told apart.
    #[error("Remote fault: {message}")]
    Fault {
        /// Fault text
        message: String,
        /// Underlying cause reported with the fault
        cause: Option<String>,
    },

    /// The channel has already been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Command could not be encoded
    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),
}

impl TransportError {
    /// Create a remote fault
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault {
            message: message.into(),
            cause: None,
        }
    }

    /// Create a remote fault with an underlying cause
    pub fn fault_with_cause(message: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::Fault {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// Whether restarting the shell may get past this error.
    ///
    /// Remote faults and writes into a shell that has gone away qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fault { .. } => true,
            Self::Io(e) => e.kind() == io::ErrorKind::BrokenPipe,
            _ => false,
        }
    }

    /// Underlying cause text, when the error carries one
    pub fn cause(&self) -> Option<String> {
        match self {
            Self::Fault { cause, .. } => cause.clone(),
            Self::Io(e) => e.get_ref().map(|inner| inner.to_string()),
            Self::Connection(message) => Some(message.clone()),
            _ => None,
        }
    }
}
