//! Process-backed command channels

use crate::{Channel, ChannelOutput, TransportError, Utf8Decoder};
use async_trait::async_trait;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// Size of a single pipe read
pub const READ_BUFFER_SIZE: usize = 8192;

/// Silence on the pipes after exit that completes the channel.
///
/// Background children may hold the pipes open long after the process itself
/// is gone.
pub const EXIT_IDLE_TICK: Duration = Duration::from_millis(50);

/// Read from a pipe that may already be closed.
///
/// A missing reader never completes, so a closed pipe drops out of a `select!`.
pub async fn read_some<R>(reader: Option<&mut R>, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

enum PipeRead {
    Stdout(io::Result<usize>),
    Stderr(io::Result<usize>),
    Exited(io::Result<ExitStatus>),
    Idle,
}

/// Channel over the standard streams of a child process
#[derive(Debug)]
pub struct ProcessChannel {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    stdout_decoder: Utf8Decoder,
    stderr_decoder: Utf8Decoder,
    exited: Option<i32>,
    exit_code: Option<i32>,
}

impl ProcessChannel {
    /// Spawn a command with all three standard streams piped
    pub fn spawn(mut command: Command) -> Result<Self, TransportError> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn()?;
        debug!("Spawned channel process {:?}", child.id());
        Ok(Self::from_child(child))
    }

    /// Wrap an already spawned child
    pub fn from_child(mut child: Child) -> Self {
        Self {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child,
            stdout_decoder: Utf8Decoder::new(),
            stderr_decoder: Utf8Decoder::new(),
            exited: None,
            exit_code: None,
        }
    }

    /// Exit code, once the process has been reaped
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    async fn reap(&mut self) -> Result<ChannelOutput, TransportError> {
        let code = match self.exited {
            Some(code) => code,
            None => {
                let status = self.child.wait().await?;
                self.record_exit(status)
            }
        };
        Ok(self.complete(code))
    }

    fn record_exit(&mut self, status: ExitStatus) -> i32 {
        debug!("Channel process exited with {}", status);
        // Killed by a signal
        let code = status.code().unwrap_or(-1);
        self.exited = Some(code);
        code
    }

    /// Report the status, dropping pipes still held by leftover children
    fn complete(&mut self, code: i32) -> ChannelOutput {
        self.stdout = None;
        self.stderr = None;
        self.exit_code = Some(code);

        ChannelOutput {
            status: Some(code),
            stdout: self.stdout_decoder.flush(),
            stderr: self.stderr_decoder.flush(),
        }
    }
}

#[async_trait]
impl Channel for ProcessChannel {
    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let stdin = self.stdin.as_mut().ok_or(TransportError::ChannelClosed)?;
        stdin.write_all(text.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<ChannelOutput, TransportError> {
        if let Some(code) = self.exit_code {
            return Ok(ChannelOutput::completed(code));
        }
        if self.stdout.is_none() && self.stderr.is_none() {
            return self.reap().await;
        }

        let mut out_buf = [0u8; READ_BUFFER_SIZE];
        let mut err_buf = [0u8; READ_BUFFER_SIZE];
        let read = match self.exited {
            Some(_) => tokio::select! {
                biased;
                n = read_some(self.stdout.as_mut(), &mut out_buf) => PipeRead::Stdout(n),
                n = read_some(self.stderr.as_mut(), &mut err_buf) => PipeRead::Stderr(n),
                _ = tokio::time::sleep(EXIT_IDLE_TICK) => PipeRead::Idle,
            },
            None => tokio::select! {
                biased;
                n = read_some(self.stdout.as_mut(), &mut out_buf) => PipeRead::Stdout(n),
                n = read_some(self.stderr.as_mut(), &mut err_buf) => PipeRead::Stderr(n),
                status = self.child.wait() => PipeRead::Exited(status),
            },
        };

        let mut output = ChannelOutput::default();
        match read {
            PipeRead::Stdout(Ok(0)) => {
                self.stdout = None;
                output.stdout = self.stdout_decoder.flush();
            }
            PipeRead::Stdout(Ok(n)) => output.stdout = self.stdout_decoder.decode(&out_buf[..n]),
            PipeRead::Stderr(Ok(0)) => {
                self.stderr = None;
                output.stderr = self.stderr_decoder.flush();
            }
            PipeRead::Stderr(Ok(n)) => output.stderr = self.stderr_decoder.decode(&err_buf[..n]),
            PipeRead::Exited(status) => {
                self.record_exit(status?);
            }
            PipeRead::Idle => {
                if let Some(code) = self.exited {
                    debug!("Pipes still open after exit, completing channel");
                    return Ok(self.complete(code));
                }
            }
            PipeRead::Stdout(Err(e)) | PipeRead::Stderr(Err(e)) => return Err(e.into()),
        }
        Ok(output)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stdin = None;
        self.stdout = None;
        self.stderr = None;

        if self.exit_code.is_some() {
            return Ok(());
        }
        if let Some(code) = self.exited {
            self.exit_code = Some(code);
            return Ok(());
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit_code = Some(status.code().unwrap_or(-1));
            }
            Ok(None) => {
                debug!("Killing channel process");
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill channel process: {}", e);
                }
                self.exit_code = Some(-1);
            }
            Err(e) => {
                warn!("Error waiting for channel process: {}", e);
            }
        }
        Ok(())
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        if self.exit_code.is_none() && self.exited.is_none() {
            let _ = self.child.start_kill();
        }
    }
}
