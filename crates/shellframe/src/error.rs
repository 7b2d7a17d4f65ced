//! Error types for shellframe

use shellframe_proto::{CommandResult, EncodeError};
use shellframe_transport::TransportError;
use thiserror::Error;

/// Cause fragments that mark a communication fault as a security problem
const SECURITY_CAUSES: &[&str] = &["authorization loop", "redirect loop"];

/// Main error type for shellframe operations
#[derive(Debug, Error)]
pub enum ShellError {
    /// Credentials or authorization were rejected
    #[error("Security error: {message}")]
    Security {
        /// Description of the failure
        message: String,
        /// Transport error that was reclassified
        #[source]
        source: Option<TransportError>,
    },

    /// The channel to the interpreter failed
    #[error("Communication error: {message}")]
    Communication {
        /// Description of the failure
        message: String,
        /// Underlying transport error
        #[source]
        source: Option<TransportError>,
    },

    /// The command itself failed
    #[error(transparent)]
    Execution(#[from] ExecutionFault),
}

impl ShellError {
    /// Communication error without an underlying transport error
    pub fn communication(message: impl Into<String>) -> Self {
        Self::Communication {
            message: message.into(),
            source: None,
        }
    }

    /// Execution details, for execution errors
    pub fn execution(&self) -> Option<&ExecutionFault> {
        match self {
            Self::Execution(fault) => Some(fault),
            _ => None,
        }
    }

    /// Whether this is a security error
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security { .. })
    }

    /// Whether this is a communication error
    pub fn is_communication(&self) -> bool {
        matches!(self, Self::Communication { .. })
    }
}

impl From<TransportError> for ShellError {
    fn from(err: TransportError) -> Self {
        let security = matches!(err, TransportError::Authentication(_))
            || err.cause().map_or(false, |cause| {
                let cause = cause.to_lowercase();
                SECURITY_CAUSES.iter().any(|marker| cause.contains(marker))
            });

        let message = err.to_string();
        if security {
            Self::Security {
                message,
                source: Some(err),
            }
        } else {
            Self::Communication {
                message,
                source: Some(err),
            }
        }
    }
}

impl From<EncodeError> for ShellError {
    fn from(err: EncodeError) -> Self {
        Self::Execution(ExecutionFault::new(format!("Cannot encode command: {}", err)))
    }
}

/// A command that ran and failed
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionFault {
    /// Failure description
    pub message: String,
    /// Exit status, when the process ended
    pub exit_code: Option<i32>,
    /// Standard output captured before the failure
    pub stdout: String,
    /// Standard error captured before the failure
    pub stderr: String,
    /// Error text reported by the interpreter loop
    pub prompt_message: Option<String>,
}

impl ExecutionFault {
    /// Create a fault with no captured output
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Set the exit status
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    /// Set the captured output
    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self.stderr = stderr.into();
        self
    }

    /// Set the interpreter error text
    pub fn with_prompt_message(mut self, prompt_message: impl Into<String>) -> Self {
        self.prompt_message = Some(prompt_message.into());
        self
    }

    /// Fault carrying everything a result captured
    pub fn from_result(message: impl Into<String>, result: CommandResult) -> Self {
        Self {
            message: message.into(),
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
            prompt_message: result.prompt_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_authorization_loop_is_security() {
        let err: ShellError =
            TransportError::fault_with_cause("WS-Man fault", "Authorization loop detected").into();
        assert!(err.is_security());
    }

    #[test]
    fn test_redirect_loop_in_io_cause_is_security() {
        let io_err = io::Error::new(io::ErrorKind::Other, "too many redirects: redirect loop");
        let err: ShellError = TransportError::Io(io_err).into();
        assert!(err.is_security());
    }

    #[test]
    fn test_authentication_is_security() {
        let err: ShellError = TransportError::Authentication("bad password".to_string()).into();
        assert!(err.is_security());
        assert!(err.to_string().contains("bad password"));
    }

    #[test]
    fn test_other_faults_are_communication() {
        let err: ShellError = TransportError::fault("shell not found").into();
        assert!(err.is_communication());

        let err: ShellError = TransportError::Timeout.into();
        assert!(err.is_communication());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_encode_error_is_execution() {
        let err: ShellError = EncodeError::EmptyCommand.into();
        let fault = err.execution().unwrap();
        assert_eq!(fault.exit_code, None);
    }

    #[test]
    fn test_fault_from_result() {
        let result = CommandResult {
            stdout: "partial".to_string(),
            stderr: "oops".to_string(),
            exit_code: Some(2),
            prompt_message: None,
        };
        let fault = ExecutionFault::from_result("Command exited with status 2", result);

        assert_eq!(fault.to_string(), "Command exited with status 2");
        assert_eq!(fault.exit_code, Some(2));
        assert_eq!(fault.stdout, "partial");
        assert_eq!(fault.stderr, "oops");
    }
}
