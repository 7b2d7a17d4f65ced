//! # Shellframe Transport
//!
//! Channel abstraction, process-backed channels and interpreter loop bootstrap
//! for shellframe.

#![warn(missing_docs)]

/// Transport abstraction and implementations
pub mod transport;

/// Process-backed command channels
pub mod channel;

/// Incremental UTF-8 decoding of pipe output
pub mod decode;

/// Interpreter loop bootstrap
pub mod bootstrap;

/// Transport error types
pub mod error;

pub use transport::{
    Channel, ChannelOutput, ConnectionInfo, LocalConfig, LocalTransport, SshConfig,
    StdioTransport, Transport, TransportType,
};
pub use channel::ProcessChannel;
pub use decode::Utf8Decoder;
pub use bootstrap::Bootstrap;
pub use error::TransportError;
