//! Executor selection
//!
//! All three ways of running a command sit behind [`ShellExecutor`]:
//! an interpreter loop [`Session`], a [`RemoteExecutor`] starting one process
//! per command over a transport, and a [`LocalExecutor`] spawning local
//! children.

use crate::{
    LocalExecConfig, LocalExecutor, RemoteExecutor, Result, Session, SessionConfig, ShellError,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shellframe_proto::{ArgumentStyle, Arguments, CommandRequest, CommandResult, Encoding};
use shellframe_transport::Transport;
use tracing::{debug, warn};

/// Common surface of all executors
#[async_trait]
pub trait ShellExecutor: Send {
    /// Short name of the implementation
    fn implementation_name(&self) -> &'static str;

    /// Prepare for commands
    async fn connect(&mut self) -> Result<()>;

    /// Run a request and return everything it produced
    async fn execute(&mut self, request: &CommandRequest) -> Result<CommandResult>;

    /// Run a script and return its standard output
    async fn run_command(&mut self, script: &str, arguments: &Arguments) -> Result<String> {
        let request = CommandRequest::new(script).with_arguments(arguments.clone());
        Ok(self.execute(&request).await?.stdout)
    }

    /// Release everything, returning the interpreter's exit status
    async fn disconnect(&mut self) -> Result<i32>;
}

#[async_trait]
impl ShellExecutor for Session {
    fn implementation_name(&self) -> &'static str {
        "loop"
    }

    async fn connect(&mut self) -> Result<()> {
        Session::connect(self).await
    }

    async fn execute(&mut self, request: &CommandRequest) -> Result<CommandResult> {
        Session::execute(self, request).await
    }

    async fn disconnect(&mut self) -> Result<i32> {
        Session::disconnect(self).await
    }
}

#[async_trait]
impl ShellExecutor for RemoteExecutor {
    fn implementation_name(&self) -> &'static str {
        "remote-exec"
    }

    async fn connect(&mut self) -> Result<()> {
        RemoteExecutor::connect(self).await
    }

    async fn execute(&mut self, request: &CommandRequest) -> Result<CommandResult> {
        RemoteExecutor::execute(self, request).await
    }

    async fn disconnect(&mut self) -> Result<i32> {
        RemoteExecutor::disconnect(self).await
    }
}

#[async_trait]
impl ShellExecutor for LocalExecutor {
    fn implementation_name(&self) -> &'static str {
        "local-exec"
    }

    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn execute(&mut self, request: &CommandRequest) -> Result<CommandResult> {
        LocalExecutor::execute(self, request).await
    }

    async fn disconnect(&mut self) -> Result<i32> {
        Ok(0)
    }
}

/// Which executor to build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// Persistent interpreter loop over a transport
    Loop {
        /// Session configuration
        #[serde(default)]
        config: SessionConfig,
    },
    /// One process per command over a transport
    RemoteExec {
        /// Command encoding
        #[serde(default)]
        encoding: Encoding,
        /// Default argument style
        #[serde(default)]
        style: ArgumentStyle,
    },
    /// One local process per command
    LocalExec {
        /// Command encoding
        #[serde(default)]
        encoding: Encoding,
        /// Default argument style
        #[serde(default)]
        style: ArgumentStyle,
        /// Process configuration
        #[serde(default)]
        config: LocalExecConfig,
    },
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Loop {
            config: SessionConfig::default(),
        }
    }
}

/// Build the executor for a strategy.
///
/// Loop and remote strategies need a transport.
pub fn select(
    strategy: Strategy,
    transport: Option<Box<dyn Transport>>,
) -> Result<Box<dyn ShellExecutor>> {
    debug!("Selecting executor for {:?}", strategy);
    match strategy {
        Strategy::Loop { config } => {
            let transport = require(transport, "loop")?;
            Ok(Box::new(Session::new(transport, config)))
        }
        Strategy::RemoteExec { encoding, style } => {
            let transport = require(transport, "remote exec")?;
            Ok(Box::new(RemoteExecutor::new(transport, encoding).with_style(style)))
        }
        Strategy::LocalExec {
            encoding,
            style,
            config,
        } => {
            if transport.is_some() {
                warn!("Local execution ignores the supplied transport");
            }
            Ok(Box::new(
                LocalExecutor::new(encoding)
                    .with_style(style)
                    .with_config(config),
            ))
        }
    }
}

fn require(transport: Option<Box<dyn Transport>>, strategy: &str) -> Result<Box<dyn Transport>> {
    transport.ok_or_else(|| {
        ShellError::communication(format!("The {} strategy needs a transport", strategy))
    })
}
