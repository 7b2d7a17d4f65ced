//! Transport abstraction and implementations

use crate::{ProcessChannel, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

/// Bidirectional text channel to a running interpreter
#[async_trait]
pub trait Channel: Send {
    /// Write text to the interpreter's input
    async fn send(&mut self, text: &str) -> Result<(), TransportError>;

    /// Wait for the next piece of output.
    ///
    /// Chunks may be empty. A status is reported once the interpreter has
    /// ended and its output has been drained.
    async fn receive(&mut self) -> Result<ChannelOutput, TransportError>;

    /// Release the channel, ending the interpreter if it still runs
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// One `receive` worth of channel output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelOutput {
    /// Completion status, once the interpreter has ended
    pub status: Option<i32>,
    /// Standard output chunk
    pub stdout: String,
    /// Standard error chunk
    pub stderr: String,
}

impl ChannelOutput {
    /// Output carrying only a completion status
    pub fn completed(status: i32) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Whether neither stream produced text
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// Connection to a host that can start interpreter channels
#[async_trait]
pub trait Transport: Send {
    /// Connect to the host
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Whether `connect` has succeeded and no disconnect followed
    fn is_connected(&self) -> bool;

    /// Run a shell command line on the host and attach a channel to it
    async fn start(&mut self, command_line: &str) -> Result<Box<dyn Channel>, TransportError>;

    /// Disconnect from the host
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Get connection information
    fn connection_info(&self) -> ConnectionInfo;
}

/// Connection information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Remote hostname or IP
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Username
    pub username: String,
    /// Connection type
    pub transport_type: TransportType,
}

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// SSH with subprocess
    SshSubprocess,
    /// Local process
    Local,
}

/// SSH configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Remote hostname or IP
    pub host: String,
    /// Remote port (default: 22)
    pub port: u16,
    /// Username
    pub username: String,
    /// SSH key path
    pub key_path: Option<PathBuf>,
    /// SSH options
    pub options: HashMap<String, String>,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// Probe the host with a trivial command on connect
    pub verify_on_connect: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 22,
            username: "root".to_string(),
            key_path: None,
            options: HashMap::new(),
            connect_timeout: 30,
            verify_on_connect: true,
        }
    }
}

/// SSH stdio transport implementation using subprocess
pub struct StdioTransport {
    /// SSH configuration
    config: SshConfig,
    /// Connection state
    connected: bool,
}

impl StdioTransport {
    /// Create a new stdio transport
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            connected: false,
        }
    }

    /// Build SSH command arguments
    fn build_ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-T".to_string(),
            "-o".to_string(), "BatchMode=yes".to_string(),
            "-o".to_string(), "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(), format!("ConnectTimeout={}", self.config.connect_timeout),
            "-p".to_string(), self.config.port.to_string(),
        ];

        if let Some(key_path) = &self.config.key_path {
            args.push("-i".to_string());
            args.push(key_path.to_string_lossy().to_string());
        }

        for (key, value) in &self.config.options {
            args.push("-o".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(format!("{}@{}", self.config.username, self.config.host));

        args
    }

    /// Execute a command over SSH and wait for its output
    async fn execute_command(&mut self, command: &str) -> Result<String, TransportError> {
        let mut ssh_args = self.build_ssh_args();
        ssh_args.push(command.to_string());

        debug!("Executing SSH command: ssh {}", ssh_args.join(" "));

        let output = Command::new("ssh")
            .args(&ssh_args)
            .output()
            .await
            .map_err(|e| TransportError::Connection(format!("Failed to execute SSH: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_ssh_failure(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Test connectivity to the remote host
    pub async fn test_connection(&mut self) -> Result<(), TransportError> {
        debug!("Testing connection to {}@{}", self.config.username, self.config.host);

        let result = self.execute_command("echo 'connection_test'").await?;

        if !result.trim().contains("connection_test") {
            return Err(TransportError::Connection("Connection test failed".to_string()));
        }

        debug!("Connection test successful");
        Ok(())
    }
}

/// Map ssh client failure output to an error
fn classify_ssh_failure(stderr: &str) -> TransportError {
    if stderr.contains("Permission denied") || stderr.contains("Authentication failed") {
        TransportError::Authentication(stderr.trim().to_string())
    } else {
        TransportError::Connection(format!("SSH command failed: {}", stderr.trim()))
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.connected {
            return Ok(());
        }

        info!("Connecting to {}@{}:{}", self.config.username, self.config.host, self.config.port);

        if self.config.verify_on_connect {
            self.test_connection().await?;
        }
        self.connected = true;

        info!("Successfully connected to {}@{}", self.config.username, self.config.host);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn start(&mut self, command_line: &str) -> Result<Box<dyn Channel>, TransportError> {
        if !self.connected {
            return Err(TransportError::Connection("Not connected".to_string()));
        }

        let mut ssh_args = self.build_ssh_args();
        ssh_args.push(command_line.to_string());
        debug!("Starting SSH channel to {}", self.config.host);

        let mut command = Command::new("ssh");
        command.args(&ssh_args);
        let channel = ProcessChannel::spawn(command)
            .map_err(|e| TransportError::Connection(format!("Failed to start SSH: {}", e)))?;
        Ok(Box::new(channel))
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.connected {
            info!("Disconnecting from {}@{}", self.config.username, self.config.host);
        }
        self.connected = false;
        Ok(())
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            host: self.config.host.clone(),
            port: self.config.port,
            username: self.config.username.clone(),
            transport_type: TransportType::SshSubprocess,
        }
    }
}

/// Local process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Shell that interprets command lines
    pub shell: String,
    /// Argument placed before the command line
    pub shell_arg: String,
    /// Working directory for started processes
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        let (shell, shell_arg) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
        Self {
            shell: shell.to_string(),
            shell_arg: shell_arg.to_string(),
            working_dir: None,
            env: HashMap::new(),
        }
    }
}

/// Transport that starts channels as local child processes
#[derive(Debug, Default)]
pub struct LocalTransport {
    config: LocalConfig,
    connected: bool,
}

impl LocalTransport {
    /// Create a new local transport
    pub fn new(config: LocalConfig) -> Self {
        Self {
            config,
            connected: false,
        }
    }

    fn build_command(&self, command_line: &str) -> Command {
        let mut command = Command::new(&self.config.shell);
        command.arg(&self.config.shell_arg).arg(command_line);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        command.envs(&self.config.env);
        command
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn start(&mut self, command_line: &str) -> Result<Box<dyn Channel>, TransportError> {
        if !self.connected {
            return Err(TransportError::Connection("Not connected".to_string()));
        }
        debug!("Starting local channel with {}", self.config.shell);
        let channel = ProcessChannel::spawn(self.build_command(command_line))?;
        Ok(Box::new(channel))
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            host: "localhost".to_string(),
            port: 0,
            username: String::new(),
            transport_type: TransportType::Local,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_config_default() {
        let config = SshConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 22);
        assert_eq!(config.username, "root");
        assert_eq!(config.connect_timeout, 30);
        assert!(config.verify_on_connect);
    }

    #[test]
    fn test_ssh_config_from_partial_json() {
        let config: SshConfig =
            serde_json::from_str(r#"{"host":"exchange01","port":2222}"#).unwrap();
        assert_eq!(config.host, "exchange01");
        assert_eq!(config.port, 2222);
        assert_eq!(config.username, "root");
    }

    #[test]
    fn test_ssh_args_building() {
        let mut config = SshConfig::default();
        config.host = "example.com".to_string();
        config.port = 2222;
        config.username = "testuser".to_string();
        config.key_path = Some(PathBuf::from("/path/to/key"));
        config.options.insert("ServerAliveInterval".to_string(), "60".to_string());

        let transport = StdioTransport::new(config);
        let args = transport.build_ssh_args();

        assert!(args.contains(&"-p".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert!(args.contains(&"-i".to_string()));
        assert!(args.contains(&"/path/to/key".to_string()));
        assert!(args.contains(&"ServerAliveInterval=60".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("testuser@example.com"));
    }

    #[test]
    fn test_connection_info() {
        let config = SshConfig {
            host: "test.example.com".to_string(),
            port: 2222,
            username: "testuser".to_string(),
            ..Default::default()
        };

        let transport = StdioTransport::new(config);
        let info = transport.connection_info();

        assert_eq!(info.host, "test.example.com");
        assert_eq!(info.port, 2222);
        assert_eq!(info.username, "testuser");
        assert_eq!(info.transport_type, TransportType::SshSubprocess);
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_disconnect_without_connect() {
        let mut transport = StdioTransport::new(SshConfig::default());
        assert!(tokio_test::block_on(transport.disconnect()).is_ok());
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_ssh_failure_classification() {
        assert!(matches!(
            classify_ssh_failure("user@host: Permission denied (publickey,password)."),
            TransportError::Authentication(_)
        ));
        assert!(matches!(
            classify_ssh_failure("ssh: connect to host example.com port 22: Connection refused"),
            TransportError::Connection(_)
        ));
    }

    #[tokio::test]
    async fn test_start_requires_connect() {
        let mut transport = LocalTransport::default();
        assert!(matches!(
            transport.start("echo hi").await,
            Err(TransportError::Connection(_))
        ));

        let mut transport = StdioTransport::new(SshConfig::default());
        assert!(matches!(
            transport.start("echo hi").await,
            Err(TransportError::Connection(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_transport_runs_command_line() {
        let mut config = LocalConfig::default();
        config.env.insert("SHELLFRAME_TEST".to_string(), "value".to_string());
        let mut transport = LocalTransport::new(config);
        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        let mut channel = transport.start("echo \"$SHELLFRAME_TEST\"; exit 2").await.unwrap();
        let mut stdout = String::new();
        let status = loop {
            let output = channel.receive().await.unwrap();
            stdout.push_str(&output.stdout);
            if let Some(status) = output.status {
                break status;
            }
        };
        assert_eq!(stdout, "value\n");
        assert_eq!(status, 2);

        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
        assert_eq!(transport.connection_info().transport_type, TransportType::Local);
    }

    #[test]
    fn test_channel_output_helpers() {
        let output = ChannelOutput::completed(0);
        assert_eq!(output.status, Some(0));
        assert!(output.is_empty());
    }
}
