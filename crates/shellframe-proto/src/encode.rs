//! Command line rendering and interpreter wrapping

use crate::{ArgumentStyle, Arguments, EncodeError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Flag that makes PowerShell read a base64 UTF-16LE script
pub const ENCODED_COMMAND_FLAG: &str = "-EncodedCommand";

/// Default PowerShell executable
pub const DEFAULT_POWERSHELL: &str = "powershell";

/// Default POSIX shell executable
pub const DEFAULT_POSIX_SHELL: &str = "sh";

/// Default remote shell program used for outer wrapping
pub const DEFAULT_REMOTE_SHELL: &str = "winrs";

/// A rendered command, either one line of text or argv tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    /// Single command line
    Line(String),
    /// Discrete argv tokens
    Tokens(Vec<String>),
}

/// Render a script and its arguments according to `style`.
///
/// [`ArgumentStyle::Exec`] yields tokens, the other styles a single line.
pub fn render(script: &str, arguments: &Arguments, style: ArgumentStyle) -> Rendered {
    match style {
        ArgumentStyle::Exec => Rendered::Tokens(render_tokens(script, arguments)),
        _ => Rendered::Line(render_command_line(script, arguments, style)),
    }
}

/// Render a script and its arguments as a single command line.
///
/// [`ArgumentStyle::Exec`] is rendered with the dash parameter shape.
pub fn render_command_line(script: &str, arguments: &Arguments, style: ArgumentStyle) -> String {
    match style {
        ArgumentStyle::Variables => {
            let mut line = String::new();
            for (name, value) in arguments.iter() {
                line.push_str(&style.qualify(name));
                line.push_str(" = ");
                line.push_str(value.unwrap_or("$null"));
                line.push_str("; ");
            }
            line.push_str(script);
            line
        }
        ArgumentStyle::DashParameters | ArgumentStyle::Exec => {
            let mut line = script.to_string();
            for (name, value) in arguments.iter() {
                line.push(' ');
                line.push_str(&style.qualify(name));
                if let Some(value) = value {
                    line.push(' ');
                    line.push_str(value);
                }
            }
            line
        }
    }
}

/// Render a program and its arguments as argv tokens. No quoting is applied.
pub fn render_tokens(script: &str, arguments: &Arguments) -> Vec<String> {
    let style = ArgumentStyle::Exec;
    let mut tokens = Vec::with_capacity(1 + arguments.len() * 2);
    tokens.push(script.to_string());
    for (name, value) in arguments.iter() {
        tokens.push(style.qualify(name));
        if let Some(value) = value {
            tokens.push(value.to_string());
        }
    }
    tokens
}

/// Transcode a script to UTF-16LE and base64 encode the bytes
pub fn encode_utf16_base64(script: &str) -> String {
    let bytes: Vec<u8> = script.encode_utf16().flat_map(u16::to_le_bytes).collect();
    STANDARD.encode(bytes)
}

/// Build `<interpreter> -EncodedCommand <base64>` for a script
pub fn wrap_for_interpreter(interpreter: &str, script: &str) -> String {
    format!("{} {} {}", interpreter, ENCODED_COMMAND_FLAG, encode_utf16_base64(script))
}

/// Interpreter a script is handed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interpreter {
    /// PowerShell, fed scripts through `-EncodedCommand`
    PowerShell {
        /// Executable name or path
        executable: String,
    },
    /// POSIX shell, fed scripts through `-c`
    Posix {
        /// Executable name or path
        executable: String,
    },
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::powershell()
    }
}

impl Interpreter {
    /// PowerShell with the default executable name
    pub fn powershell() -> Self {
        Self::PowerShell {
            executable: DEFAULT_POWERSHELL.to_string(),
        }
    }

    /// POSIX shell with the default executable name
    pub fn posix() -> Self {
        Self::Posix {
            executable: DEFAULT_POSIX_SHELL.to_string(),
        }
    }

    /// Executable name or path
    pub fn executable(&self) -> &str {
        match self {
            Self::PowerShell { executable } | Self::Posix { executable } => executable,
        }
    }

    /// Wrap a script into a command line that a shell can pass on verbatim
    pub fn wrap(&self, script: &str) -> Result<String, EncodeError> {
        match self {
            Self::PowerShell { executable } => Ok(wrap_for_interpreter(executable, script)),
            Self::Posix { executable } => Ok(format!(
                "{} -c {}",
                shlex::try_quote(executable)?,
                shlex::try_quote(script)?
            )),
        }
    }

    /// Wrap a script into argv tokens for direct process spawning
    pub fn wrap_argv(&self, script: &str) -> Vec<String> {
        match self {
            Self::PowerShell { executable } => vec![
                executable.clone(),
                ENCODED_COMMAND_FLAG.to_string(),
                encode_utf16_base64(script),
            ],
            Self::Posix { executable } => {
                vec![executable.clone(), "-c".to_string(), script.to_string()]
            }
        }
    }
}

/// Remote shell client used to run a command line on another host
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteShell {
    /// Remote shell program
    pub program: String,
    /// Remote endpoint
    pub endpoint: String,
    /// User name
    pub username: String,
    /// Password
    pub password: String,
    /// Allow credential delegation
    pub allow_delegate: bool,
}

impl Default for RemoteShell {
    fn default() -> Self {
        Self {
            program: DEFAULT_REMOTE_SHELL.to_string(),
            endpoint: String::new(),
            username: String::new(),
            password: String::new(),
            allow_delegate: false,
        }
    }
}

impl fmt::Debug for RemoteShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteShell")
            .field("program", &self.program)
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"***")
            .field("allow_delegate", &self.allow_delegate)
            .finish()
    }
}

impl RemoteShell {
    /// Create a remote shell for an endpoint and credentials
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// Enable or disable credential delegation
    pub fn with_delegation(mut self, allow_delegate: bool) -> Self {
        self.allow_delegate = allow_delegate;
        self
    }

    /// Remote shell invocation with the command line as its last token
    pub fn wrap_argv(&self, command_line: String) -> Vec<String> {
        let mut argv = vec![
            self.program.clone(),
            format!("-r:{}", self.endpoint),
            format!("-u:{}", self.username),
            format!("-p:{}", self.password),
        ];
        if self.allow_delegate {
            argv.push("-ad".to_string());
        }
        argv.push(command_line);
        argv
    }
}

/// How a rendered command reaches the process that runs it
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Encoding {
    /// Rendered command as-is
    #[default]
    Plain,
    /// Rendered command wrapped for an interpreter
    Interpreter {
        /// Target interpreter
        interpreter: Interpreter,
    },
    /// Rendered command, optionally interpreter-wrapped, run through a remote shell
    Outer {
        /// Remote shell client
        remote: RemoteShell,
        /// Interpreter wrapping applied before the remote shell
        inner: Option<Interpreter>,
    },
}

impl Encoding {
    /// Copy with remote shell credentials masked, for logging
    pub fn redacted(&self) -> Self {
        match self {
            Self::Outer { remote, inner } => Self::Outer {
                remote: RemoteShell {
                    password: "***".to_string(),
                    ..remote.clone()
                },
                inner: inner.clone(),
            },
            other => other.clone(),
        }
    }

    /// Interpreter wrapping, if any
    pub fn interpreter(&self) -> Option<&Interpreter> {
        match self {
            Self::Plain => None,
            Self::Interpreter { interpreter } => Some(interpreter),
            Self::Outer { inner, .. } => inner.as_ref(),
        }
    }

    /// Encode as one command line for a transport that hands it to a shell
    pub fn to_command_line(
        &self,
        script: &str,
        arguments: &Arguments,
        style: ArgumentStyle,
    ) -> Result<String, EncodeError> {
        match self {
            Self::Plain => Ok(render_command_line(script, arguments, style)),
            Self::Interpreter { interpreter } => {
                interpreter.wrap(&render_command_line(script, arguments, style))
            }
            Self::Outer { .. } => {
                let argv = self.to_argv(script, arguments, style)?;
                Ok(shlex::try_join(argv.iter().map(String::as_str))?)
            }
        }
    }

    /// Encode as argv tokens for spawning a local process.
    ///
    /// Plain encoding always uses the exec token shape.
    pub fn to_argv(
        &self,
        script: &str,
        arguments: &Arguments,
        style: ArgumentStyle,
    ) -> Result<Vec<String>, EncodeError> {
        let argv = match self {
            Self::Plain => render_tokens(script, arguments),
            Self::Interpreter { interpreter } => {
                interpreter.wrap_argv(&render_command_line(script, arguments, style))
            }
            Self::Outer { remote, inner } => {
                let line = render_command_line(script, arguments, style);
                let line = match inner {
                    Some(interpreter) => interpreter.wrap(&line)?,
                    None => line,
                };
                remote.wrap_argv(line)
            }
        };

        if argv.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(EncodeError::EmptyCommand);
        }
        Ok(argv)
    }
}
