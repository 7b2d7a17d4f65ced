//! # Shellframe Protocol
//!
//! Command encoding and sentinel framing for the shellframe session protocol.

#![warn(missing_docs)]

/// Named arguments and argument rendering styles
pub mod args;

/// Command line rendering and interpreter wrapping
pub mod encode;

/// Sentinel framing and response scanning
pub mod sentinel;

/// Command request and result types
pub mod message;

/// Error types for encoding operations
pub mod error;

pub use args::{ArgumentStyle, Arguments};
pub use encode::{Encoding, Interpreter, RemoteShell, Rendered};
pub use sentinel::{ResponseScanner, DEFAULT_SENTINEL};
pub use message::{CommandRequest, CommandResult};
pub use error::EncodeError;
