//! One process per command over a transport

use crate::{log_data, log_execution, ExecutionFault, Result};
use shellframe_proto::{ArgumentStyle, Arguments, CommandRequest, CommandResult, Encoding};
use shellframe_transport::{Channel, ConnectionInfo, Transport};
use std::time::Instant;
use tracing::{debug, warn};

/// Runs every command as its own process on the far side of a transport.
///
/// The transport is disconnected after each command.
pub struct RemoteExecutor {
    transport: Box<dyn Transport>,
    encoding: Encoding,
    style: ArgumentStyle,
}

impl RemoteExecutor {
    /// Create an executor over a transport
    pub fn new(transport: Box<dyn Transport>, encoding: Encoding) -> Self {
        Self {
            transport,
            encoding,
            style: ArgumentStyle::default(),
        }
    }

    /// Set the default argument style
    pub fn with_style(mut self, style: ArgumentStyle) -> Self {
        self.style = style;
        self
    }

    /// Connection information of the transport
    pub fn connection_info(&self) -> ConnectionInfo {
        self.transport.connection_info()
    }

    /// Connect the transport
    pub async fn connect(&mut self) -> Result<()> {
        if !self.transport.is_connected() {
            self.transport.connect().await?;
        }
        Ok(())
    }

    /// Disconnect the transport
    pub async fn disconnect(&mut self) -> Result<i32> {
        self.transport.disconnect().await?;
        Ok(0)
    }

    /// Run a script and return its standard output
    pub async fn run_command(&mut self, script: &str, arguments: &Arguments) -> Result<String> {
        let request = CommandRequest::new(script).with_arguments(arguments.clone());
        Ok(self.execute(&request).await?.stdout)
    }

    /// Run a request to completion
    pub async fn execute(&mut self, request: &CommandRequest) -> Result<CommandResult> {
        let style = request.style_or(self.style);
        let command_line = self
            .encoding
            .to_command_line(&request.script, &request.arguments, style)?;
        if tracing::enabled!(tracing::Level::TRACE) {
            let shown = self
                .encoding
                .redacted()
                .to_command_line(&request.script, &request.arguments, style)?;
            log_data("X>", &shown);
        }
        let started = Instant::now();

        let outcome = self.run(&command_line).await;
        log_execution(&request.script, started);
        if let Err(e) = self.transport.disconnect().await {
            warn!("Failed to disconnect transport: {}", e);
        }

        let result = outcome?;
        match result.exit_code {
            Some(0) | None => Ok(result),
            Some(code) => {
                let message = format!("Command exited with status {}", code);
                Err(ExecutionFault::from_result(message, result).into())
            }
        }
    }

    async fn run(&mut self, command_line: &str) -> Result<CommandResult> {
        self.connect().await?;
        debug!("Starting remote command");

        let mut channel = self.transport.start(command_line).await?;
        let collected = collect(channel.as_mut()).await;
        if let Err(e) = channel.close().await {
            warn!("Failed to close channel: {}", e);
        }
        collected
    }
}

/// Gather output until the channel reports a status
async fn collect(channel: &mut dyn Channel) -> Result<CommandResult> {
    let mut result = CommandResult::default();
    loop {
        let output = channel.receive().await?;
        log_data("O<", &output.stdout);
        log_data("E<", &output.stderr);
        result.stdout.push_str(&output.stdout);
        result.stderr.push_str(&output.stderr);

        if let Some(status) = output.status {
            log_data("X>", &status.to_string());
            result.exit_code = Some(status);
            return Ok(result);
        }
    }
}
