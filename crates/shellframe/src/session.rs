//! Interpreter loop sessions
//!
//! A session keeps one interpreter process alive on the far side of a
//! transport. The interpreter runs a read-eval-respond loop (see
//! [`Bootstrap`]) and every command is framed with the sentinel line, so the
//! end of its output is the first line starting with the sentinel.

use crate::{log_data, log_execution, ExecutionFault, Result, ShellError};
use serde::{Deserialize, Serialize};
use shellframe_proto::encode::render_command_line;
use shellframe_proto::sentinel::{exit_request, frame_command, is_error_message};
use shellframe_proto::{
    ArgumentStyle, Arguments, CommandRequest, CommandResult, Interpreter, ResponseScanner,
    DEFAULT_SENTINEL,
};
use shellframe_transport::{
    Bootstrap, Channel, ChannelOutput, ConnectionInfo, LocalConfig, LocalTransport, SshConfig,
    StdioTransport, Transport, TransportError,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Line marking the end of every command and response
    pub sentinel: String,
    /// Script run once before the loop starts
    pub init_script: Option<String>,
    /// Interpreter the loop runs in
    pub interpreter: Interpreter,
    /// Argument style for requests that do not set one
    pub argument_style: ArgumentStyle,
    /// Longest wait for a single piece of output, in milliseconds
    pub command_timeout_ms: Option<u64>,
    /// Restarts allowed per command after a transient send fault
    pub reconnect_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sentinel: DEFAULT_SENTINEL.to_string(),
            init_script: None,
            interpreter: Interpreter::default(),
            argument_style: ArgumentStyle::default(),
            command_timeout_ms: None,
            reconnect_attempts: 1,
        }
    }
}

impl SessionConfig {
    /// Receive watchdog, if configured
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport has not been connected
    NotConnected,
    /// Transport is connecting
    Connecting,
    /// Loop has been submitted and the ready sentinel is awaited
    LoopStarting,
    /// Loop is waiting for a command
    LoopReady,
    /// A command is being evaluated
    Executing,
    /// Loop ended with status 0; the next command restarts it
    Terminated,
    /// Channel and transport have been released
    Disconnected,
}

enum TransportKind {
    Ssh(SshConfig),
    Local(LocalConfig),
    Custom(Box<dyn Transport>),
}

/// Session builder for configuring connections
pub struct SessionBuilder {
    /// Transport to run the loop over
    transport: TransportKind,
    /// Session configuration
    config: SessionConfig,
}

impl SessionBuilder {
    /// Create a builder over an existing transport
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport: TransportKind::Custom(transport),
            config: SessionConfig::default(),
        }
    }

    /// Create a builder for an SSH target
    pub fn ssh(target: &str) -> Self {
        let (username, host, port) = Self::parse_target(target);
        let ssh_config = SshConfig {
            host,
            port,
            username,
            ..Default::default()
        };

        Self {
            transport: TransportKind::Ssh(ssh_config),
            config: SessionConfig::default(),
        }
    }

    /// Create a builder for an interpreter on the local host
    pub fn local() -> Self {
        Self {
            transport: TransportKind::Local(LocalConfig::default()),
            config: SessionConfig::default(),
        }
    }

    /// Parse target string into components
    fn parse_target(target: &str) -> (String, String, u16) {
        // Format: [user@]host[:port]
        let mut username = "root".to_string();
        let mut host = target.to_string();
        let mut port = 22;

        if let Some(at_pos) = target.find('@') {
            username = target[..at_pos].to_string();
            host = target[at_pos + 1..].to_string();
        }

        if let Some(colon_pos) = host.rfind(':') {
            if let Ok(parsed_port) = host[colon_pos + 1..].parse::<u16>() {
                port = parsed_port;
                host = host[..colon_pos].to_string();
            }
        }

        (username, host, port)
    }

    /// Set SSH key path
    pub fn with_key(mut self, key_path: PathBuf) -> Self {
        if let TransportKind::Ssh(ssh_config) = &mut self.transport {
            ssh_config.key_path = Some(key_path);
        }
        self
    }

    /// Set an SSH option
    pub fn with_ssh_option(mut self, key: String, value: String) -> Self {
        if let TransportKind::Ssh(ssh_config) = &mut self.transport {
            ssh_config.options.insert(key, value);
        }
        self
    }

    /// Set the SSH connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        if let TransportKind::Ssh(ssh_config) = &mut self.transport {
            ssh_config.connect_timeout = timeout.as_secs();
        }
        self
    }

    /// Set the working directory of a local interpreter
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        if let TransportKind::Local(local_config) = &mut self.transport {
            local_config.working_dir = Some(dir);
        }
        self
    }

    /// Set the sentinel
    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.config.sentinel = sentinel.into();
        self
    }

    /// Run a script before the loop starts
    pub fn with_init_script(mut self, script: impl Into<String>) -> Self {
        self.config.init_script = Some(script.into());
        self
    }

    /// Set the interpreter
    pub fn with_interpreter(mut self, interpreter: Interpreter) -> Self {
        self.config.interpreter = interpreter;
        self
    }

    /// Set the default argument style
    pub fn with_argument_style(mut self, style: ArgumentStyle) -> Self {
        self.config.argument_style = style;
        self
    }

    /// Bound the wait for each piece of command output
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.config.command_timeout_ms = Some(millis);
        self
    }

    /// Set the restarts allowed after a transient send fault
    pub fn with_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnect_attempts = attempts;
        self
    }

    /// Replace the whole session configuration
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the session configuration
    pub fn build_config(&self) -> SessionConfig {
        self.config.clone()
    }

    /// Build the session without connecting
    pub fn build(self) -> Session {
        let transport: Box<dyn Transport> = match self.transport {
            TransportKind::Ssh(ssh_config) => Box::new(StdioTransport::new(ssh_config)),
            TransportKind::Local(local_config) => Box::new(LocalTransport::new(local_config)),
            TransportKind::Custom(transport) => transport,
        };
        Session::new(transport, self.config)
    }

    /// Build the session and start its loop
    pub async fn connect(self) -> Result<Session> {
        let mut session = self.build();
        session.connect().await?;
        Ok(session)
    }
}

/// Wait for channel output, bounded by the watchdog when one is set
async fn receive(
    channel: &mut dyn Channel,
    timeout: Option<Duration>,
) -> std::result::Result<ChannelOutput, TransportError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, channel.receive())
            .await
            .map_err(|_| TransportError::Timeout)?,
        None => channel.receive().await,
    }
}

/// Send the exit line and wait for the interpreter's status
async fn request_exit(
    channel: &mut dyn Channel,
    sentinel: &str,
    timeout: Option<Duration>,
) -> std::result::Result<i32, TransportError> {
    let request = exit_request(sentinel);
    log_data("I>", &request);
    channel.send(&request).await?;

    loop {
        let output = receive(channel, timeout).await?;
        log_data("O<", &output.stdout);
        log_data("E<", &output.stderr);
        if let Some(status) = output.status {
            log_data("X>", &status.to_string());
            return Ok(status);
        }
    }
}

/// Persistent interpreter loop over a transport
pub struct Session {
    /// Unique session ID
    id: Uuid,
    /// Session configuration
    config: SessionConfig,
    /// Transport the loop channel is started on
    transport: Box<dyn Transport>,
    /// Channel to the running loop
    channel: Option<Box<dyn Channel>>,
    /// Whether the loop is running
    running: bool,
    /// Lifecycle state
    state: SessionState,
}

impl Session {
    /// Create a new SSH session builder
    pub fn ssh(target: &str) -> SessionBuilder {
        debug!("Creating SSH session builder for target: {}", target);
        SessionBuilder::ssh(target)
    }

    /// Create a new local session builder
    pub fn local() -> SessionBuilder {
        SessionBuilder::local()
    }

    /// Create a session over a transport
    pub fn new(transport: Box<dyn Transport>, config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            transport,
            channel: None,
            running: false,
            state: SessionState::NotConnected,
        }
    }

    /// Session ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the loop is running
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connection information of the transport
    pub fn connection_info(&self) -> ConnectionInfo {
        self.transport.connection_info()
    }

    /// Connect the transport and start the loop
    pub async fn connect(&mut self) -> Result<()> {
        if !self.running {
            self.start_loop().await?;
        }
        Ok(())
    }

    /// Run a script and return its standard output
    pub async fn run_command(&mut self, script: &str, arguments: &Arguments) -> Result<String> {
        let request = CommandRequest::new(script).with_arguments(arguments.clone());
        Ok(self.execute(&request).await?.stdout)
    }

    /// Run a request and return everything it produced
    pub async fn execute(&mut self, request: &CommandRequest) -> Result<CommandResult> {
        let style = request.style_or(self.config.argument_style);
        let command_line = render_command_line(&request.script, &request.arguments, style);
        let framed = frame_command(&command_line, &self.config.sentinel);
        let started = Instant::now();

        let was_running = self.running;
        if !was_running {
            self.start_loop().await?;
        }
        self.send_framed(&framed, was_running).await?;

        self.state = SessionState::Executing;
        let result = self.collect_response().await;
        log_execution(&command_line, started);
        result
    }

    /// Ask the loop to exit and release everything.
    ///
    /// Returns the interpreter's exit status, or 0 when no loop was running.
    pub async fn disconnect(&mut self) -> Result<i32> {
        let status = match self.channel.take() {
            Some(mut channel) if self.running => {
                info!("Disconnecting session {}", self.id);
                let status = request_exit(
                    channel.as_mut(),
                    &self.config.sentinel,
                    self.config.command_timeout(),
                )
                .await;
                self.channel = Some(channel);
                match status {
                    Ok(status) => status,
                    Err(e) => {
                        self.teardown().await;
                        return Err(e.into());
                    }
                }
            }
            channel => {
                self.channel = channel;
                0
            }
        };

        self.release().await?;
        Ok(status)
    }

    /// Connect if needed, submit the loop and wait for its ready sentinel
    async fn start_loop(&mut self) -> Result<()> {
        if !self.transport.is_connected() {
            self.state = SessionState::Connecting;
            info!("Connecting session {}", self.id);
            if let Err(e) = self.transport.connect().await {
                self.state = SessionState::NotConnected;
                return Err(e.into());
            }
        }

        self.state = SessionState::LoopStarting;
        let mut bootstrap = Bootstrap::new(
            self.config.interpreter.clone(),
            self.config.sentinel.clone(),
        );
        if let Some(init) = &self.config.init_script {
            bootstrap = bootstrap.with_init_script(init.clone());
        }
        let invocation = match bootstrap.invocation() {
            Ok(invocation) => invocation,
            Err(e) => {
                self.teardown().await;
                return Err(e.into());
            }
        };

        let mut channel = match self.transport.start(&invocation).await {
            Ok(channel) => channel,
            Err(e) => {
                self.teardown().await;
                return Err(e.into());
            }
        };

        let mut scanner = ResponseScanner::new(self.config.sentinel.clone());
        let mut stderr = String::new();
        loop {
            let output = match receive(channel.as_mut(), self.config.command_timeout()).await {
                Ok(output) => output,
                Err(e) => {
                    self.channel = Some(channel);
                    self.teardown().await;
                    return Err(e.into());
                }
            };
            log_data("O<", &output.stdout);
            log_data("E<", &output.stderr);
            stderr.push_str(&output.stderr);

            if scanner.feed(&output.stdout).is_some() {
                break;
            }
            if let Some(status) = output.status {
                log_data("X>", &status.to_string());
                let (stdout, prompt) = scanner.finish();
                self.channel = Some(channel);
                self.teardown().await;

                let mut fault = ExecutionFault::new(format!(
                    "Interpreter exited with status {} before the loop started",
                    status
                ))
                .with_exit_code(status)
                .with_output(stdout, stderr);
                fault.prompt_message = prompt;
                return Err(fault.into());
            }
        }

        let (preamble, _) = scanner.finish();
        if !preamble.is_empty() {
            debug!("Init output: {}", preamble.trim_end());
        }

        self.channel = Some(channel);
        self.running = true;
        self.state = SessionState::LoopReady;
        info!("Interpreter loop ready in session {}", self.id);
        Ok(())
    }

    /// Send a framed command, restarting the loop on transient faults
    async fn send_framed(&mut self, framed: &str, was_running: bool) -> Result<()> {
        let mut retries_left = if was_running {
            self.config.reconnect_attempts
        } else {
            0
        };

        loop {
            let sent = match self.channel.as_mut() {
                Some(channel) => channel.send(framed).await,
                None => Err(TransportError::ChannelClosed),
            };

            match sent {
                Ok(()) => {
                    log_data("I>", framed);
                    return Ok(());
                }
                Err(e) if e.is_transient() && retries_left > 0 => {
                    retries_left -= 1;
                    warn!("Send failed in session {}, restarting loop: {}", self.id, e);
                    self.running = false;
                    self.close_channel().await;
                    if let Err(e) = self.transport.disconnect().await {
                        warn!("Failed to disconnect transport: {}", e);
                    }
                    self.start_loop().await?;
                }
                Err(e) => {
                    self.teardown().await;
                    return Err(e.into());
                }
            }
        }
    }

    /// Read until the response line or the end of the interpreter
    async fn collect_response(&mut self) -> Result<CommandResult> {
        let mut channel = match self.channel.take() {
            Some(channel) => channel,
            None => return Err(ShellError::communication("Session has no open channel")),
        };

        let mut scanner = ResponseScanner::new(self.config.sentinel.clone());
        let mut stderr = String::new();
        loop {
            let output = match receive(channel.as_mut(), self.config.command_timeout()).await {
                Ok(output) => output,
                Err(e) => {
                    self.channel = Some(channel);
                    self.teardown().await;
                    return Err(e.into());
                }
            };
            log_data("O<", &output.stdout);
            log_data("E<", &output.stderr);
            stderr.push_str(&output.stderr);

            if let Some(prompt) = scanner.feed(&output.stdout).map(str::to_string) {
                self.channel = Some(channel);
                self.state = SessionState::LoopReady;
                let (stdout, _) = scanner.finish();

                if is_error_message(&prompt) {
                    let fault = ExecutionFault::new(prompt.trim())
                        .with_output(stdout, stderr)
                        .with_prompt_message(prompt);
                    return Err(fault.into());
                }
                return Ok(CommandResult {
                    stdout,
                    stderr,
                    exit_code: None,
                    prompt_message: None,
                });
            }

            if let Some(status) = output.status {
                log_data("X>", &status.to_string());
                let (stdout, prompt_message) = scanner.finish();
                let result = CommandResult {
                    stdout,
                    stderr,
                    exit_code: Some(status),
                    prompt_message,
                };

                if status == 0 {
                    debug!("Interpreter exited with status 0 in session {}", self.id);
                    self.running = false;
                    self.state = SessionState::Terminated;
                    if let Err(e) = channel.close().await {
                        warn!("Failed to close channel: {}", e);
                    }
                    return Ok(result);
                }

                self.channel = Some(channel);
                self.teardown().await;
                let message = format!("Interpreter exited with status {}", status);
                return Err(ExecutionFault::from_result(message, result).into());
            }
        }
    }

    async fn close_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                warn!("Failed to close channel: {}", e);
            }
        }
    }

    /// Close the channel and disconnect the transport
    async fn release(&mut self) -> Result<()> {
        self.running = false;
        self.close_channel().await;
        let disconnected = self.transport.disconnect().await;
        self.state = SessionState::Disconnected;
        disconnected.map_err(Into::into)
    }

    /// Release everything after a failure, keeping the original error
    async fn teardown(&mut self) {
        debug!("Tearing down session {}", self.id);
        if let Err(e) = self.release().await {
            warn!("Failed to disconnect transport: {}", e);
        }
    }
}
