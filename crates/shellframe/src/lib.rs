//! # Shellframe
//!
//! Run command scripts against long-lived shell interpreters.
//!
//! A [`Session`] starts a read-eval-respond loop inside an interpreter on the
//! other end of a [`Transport`](transport::Transport) and frames every command
//! with a sentinel line, so that many commands share one interpreter process.
//! [`LocalExecutor`] and [`RemoteExecutor`] run one process per command
//! instead. [`strategy::select`] picks between the three.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use shellframe_proto as proto;
pub use shellframe_transport as transport;

/// Error types for shellframe
pub mod error;

/// Interpreter loop sessions
pub mod session;

/// One process per command on the local host
pub mod local;

/// One process per command over a transport
pub mod exec;

/// Executor selection
pub mod strategy;

pub use error::{ExecutionFault, ShellError};
pub use session::{Session, SessionBuilder, SessionConfig, SessionState};
pub use local::{LocalExecConfig, LocalExecutor};
pub use exec::RemoteExecutor;
pub use strategy::{select, ShellExecutor, Strategy};
pub use shellframe_proto::{
    ArgumentStyle, Arguments, CommandRequest, CommandResult, Encoding, Interpreter, RemoteShell,
};

/// Result type alias for shellframe operations
pub type Result<T> = std::result::Result<T, ShellError>;

/// Log channel traffic under a direction prefix
pub(crate) fn log_data(prefix: &str, data: &str) {
    if !data.is_empty() {
        tracing::trace!("{} {}", prefix, data.trim_end());
    }
}

/// Log how long a command took
pub(crate) fn log_execution(command: &str, started: std::time::Instant) {
    tracing::debug!("Executed {:?} in {:?}", command, started.elapsed());
}
