//! Error types for encoding operations

use thiserror::Error;

/// Errors raised while turning a script into something a shell can run
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The rendered command has no program token
    #[error("Command is empty after rendering")]
    EmptyCommand,

    /// A token could not be quoted for a POSIX shell
    #[error("Failed to quote command: {0}")]
    Quote(#[from] shlex::QuoteError),

    /// The sentinel cannot frame commands
    #[error("Invalid sentinel: {0}")]
    InvalidSentinel(String),
}
