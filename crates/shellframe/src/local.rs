//! One process per command on the local host
//!
//! The child is spawned with separate stdout and stderr pipes which are drained
//! concurrently, racing a short poll tick. Once the child has exited the loop
//! keeps reading until the pipes close or stay idle for one tick, so a
//! background process that inherited the pipes cannot stall the caller.

use crate::{log_data, log_execution, ExecutionFault, Result};
use serde::{Deserialize, Serialize};
use shellframe_proto::{ArgumentStyle, Arguments, CommandRequest, CommandResult, Encoding};
use shellframe_transport::channel::{read_some, READ_BUFFER_SIZE};
use shellframe_transport::Utf8Decoder;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Local execution configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalExecConfig {
    /// Wait between exit checks, in milliseconds
    pub poll_interval_ms: u64,
    /// Working directory for spawned processes
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
}

impl Default for LocalExecConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            working_dir: None,
            env: HashMap::new(),
        }
    }
}

impl LocalExecConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

enum DrainEvent {
    Cancelled,
    Stdout(io::Result<usize>),
    Stderr(io::Result<usize>),
    Tick,
}

struct Drained {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

/// Runs every command as its own local process
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    encoding: Encoding,
    style: ArgumentStyle,
    config: LocalExecConfig,
}

impl LocalExecutor {
    /// Create an executor for an encoding
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            style: ArgumentStyle::default(),
            config: LocalExecConfig::default(),
        }
    }

    /// Set the default argument style
    pub fn with_style(mut self, style: ArgumentStyle) -> Self {
        self.style = style;
        self
    }

    /// Set the configuration
    pub fn with_config(mut self, config: LocalExecConfig) -> Self {
        self.config = config;
        self
    }

    /// Command encoding
    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    /// Run a script and return its standard output
    pub async fn run_command(&self, script: &str, arguments: &Arguments) -> Result<String> {
        let request = CommandRequest::new(script).with_arguments(arguments.clone());
        Ok(self.execute(&request).await?.stdout)
    }

    /// Run a request to completion
    pub async fn execute(&self, request: &CommandRequest) -> Result<CommandResult> {
        self.execute_cancellable(request, &CancellationToken::new()).await
    }

    /// Run a request, killing the process if `cancel` fires first
    pub async fn execute_cancellable(
        &self,
        request: &CommandRequest,
        cancel: &CancellationToken,
    ) -> Result<CommandResult> {
        let style = request.style_or(self.style);
        let argv = self.encoding.to_argv(&request.script, &request.arguments, style)?;
        let (program, args) = match argv.split_first() {
            Some(split) => split,
            None => return Err(ExecutionFault::new("Nothing to execute").into()),
        };
        if tracing::enabled!(tracing::Level::TRACE) {
            let shown = self
                .encoding
                .redacted()
                .to_argv(&request.script, &request.arguments, style)?;
            log_data("X>", &shown.join(" "));
        }

        let started = Instant::now();
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        command.envs(&self.config.env);

        let mut child = command
            .spawn()
            .map_err(|e| ExecutionFault::new(format!("Failed to start {}: {}", program, e)))?;
        debug!("Spawned {} as process {:?}", program, child.id());

        let drained = drain(&mut child, self.config.poll_interval(), cancel).await;
        log_execution(&request.script, started);
        let Drained {
            status,
            stdout,
            stderr,
        } = drained?;

        match status.code() {
            Some(0) => Ok(CommandResult::exited(stdout, stderr, 0)),
            Some(code) => {
                let message = format!("{} exited with status {}", program, code);
                Err(ExecutionFault::new(message)
                    .with_exit_code(code)
                    .with_output(stdout, stderr)
                    .into())
            }
            None => Err(ExecutionFault::new(format!("{} was terminated by a signal", program))
                .with_output(stdout, stderr)
                .into()),
        }
    }
}

/// Read both pipes until the child has exited and its output is drained
async fn drain(
    child: &mut Child,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<Drained> {
    let mut stdout_pipe: Option<ChildStdout> = child.stdout.take();
    let mut stderr_pipe: Option<ChildStderr> = child.stderr.take();
    let mut stdout_decoder = Utf8Decoder::new();
    let mut stderr_decoder = Utf8Decoder::new();
    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut out_buf = vec![0u8; READ_BUFFER_SIZE];
    let mut err_buf = vec![0u8; READ_BUFFER_SIZE];
    let mut status: Option<ExitStatus> = None;

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => DrainEvent::Cancelled,
            n = read_some(stdout_pipe.as_mut(), &mut out_buf) => DrainEvent::Stdout(n),
            n = read_some(stderr_pipe.as_mut(), &mut err_buf) => DrainEvent::Stderr(n),
            _ = tokio::time::sleep(poll_interval) => DrainEvent::Tick,
        };

        match event {
            DrainEvent::Cancelled => {
                debug!("Execution cancelled, killing process");
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill process: {}", e);
                }
                stdout.push_str(&stdout_decoder.flush());
                stderr.push_str(&stderr_decoder.flush());
                return Err(ExecutionFault::new("Execution was interrupted")
                    .with_output(stdout, stderr)
                    .into());
            }
            DrainEvent::Stdout(Ok(0)) => stdout_pipe = None,
            DrainEvent::Stdout(Ok(n)) => stdout.push_str(&stdout_decoder.decode(&out_buf[..n])),
            DrainEvent::Stderr(Ok(0)) => stderr_pipe = None,
            DrainEvent::Stderr(Ok(n)) => stderr.push_str(&stderr_decoder.decode(&err_buf[..n])),
            DrainEvent::Stdout(Err(e)) | DrainEvent::Stderr(Err(e)) => {
                return Err(ExecutionFault::new(format!("Failed to read process output: {}", e))
                    .with_output(stdout, stderr)
                    .into());
            }
            // Exited and idle for a full tick
            DrainEvent::Tick if status.is_some() => break,
            DrainEvent::Tick => {}
        }

        if status.is_none() {
            status = child
                .try_wait()
                .map_err(|e| ExecutionFault::new(format!("Failed to check process status: {}", e)))?;
        }
        if stdout_pipe.is_none() && stderr_pipe.is_none() {
            break;
        }
    }

    let status = match status {
        Some(status) => status,
        None => child
            .wait()
            .await
            .map_err(|e| ExecutionFault::new(format!("Failed to wait for process: {}", e)))?,
    };
    stdout.push_str(&stdout_decoder.flush());
    stderr.push_str(&stderr_decoder.flush());

    Ok(Drained {
        status,
        stdout,
        stderr,
    })
}
