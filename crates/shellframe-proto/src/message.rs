//! Command request and result types

use crate::{ArgumentStyle, Arguments};
use serde::{Deserialize, Serialize};

/// A script to run, with its named arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Script text or program name
    pub script: String,
    /// Named arguments in insertion order
    #[serde(default)]
    pub arguments: Arguments,
    /// Argument style; the executor default applies when unset
    #[serde(default)]
    pub style: Option<ArgumentStyle>,
}

impl CommandRequest {
    /// Create a request without arguments
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            arguments: Arguments::new(),
            style: None,
        }
    }

    /// Set the arguments
    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }

    /// Set the argument style
    pub fn with_style(mut self, style: ArgumentStyle) -> Self {
        self.style = Some(style);
        self
    }

    /// Style to render with, given the executor's default
    pub fn style_or(&self, default: ArgumentStyle) -> ArgumentStyle {
        self.style.unwrap_or(default)
    }
}

/// Captured outcome of a command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit status, when the process ended
    pub exit_code: Option<i32>,
    /// Text following the sentinel in the response line
    pub prompt_message: Option<String>,
}

impl CommandResult {
    /// Result of a finished process
    pub fn exited(stdout: String, stderr: String, exit_code: i32) -> Self {
        Self {
            stdout,
            stderr,
            exit_code: Some(exit_code),
            prompt_message: None,
        }
    }

    /// Whether the process ended during this command
    pub fn ended_process(&self) -> bool {
        self.exit_code.is_some()
    }
}
