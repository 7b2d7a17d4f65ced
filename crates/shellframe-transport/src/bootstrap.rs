//! Interpreter loop bootstrap
//!
//! The payload started on the channel is the caller's init script followed by
//! a read-eval-respond loop. The loop writes the sentinel once when it is
//! ready, then repeatedly collects lines up to a sentinel line, evaluates them
//! as one unit and answers with the sentinel followed by the evaluation error
//! text. A `<sentinel> exit` line or end of input ends the interpreter with
//! status 0.

use shellframe_proto::sentinel::{validate_sentinel, EXIT_SUFFIX};
use shellframe_proto::{EncodeError, Interpreter, DEFAULT_SENTINEL};
use tracing::debug;

/// Generates and wraps the interpreter loop
#[derive(Debug, Clone)]
pub struct Bootstrap {
    interpreter: Interpreter,
    sentinel: String,
    init_script: Option<String>,
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self::new(Interpreter::default(), DEFAULT_SENTINEL)
    }
}

impl Bootstrap {
    /// Create a bootstrap for an interpreter and sentinel
    pub fn new(interpreter: Interpreter, sentinel: impl Into<String>) -> Self {
        Self {
            interpreter,
            sentinel: sentinel.into(),
            init_script: None,
        }
    }

    /// Run a script before the loop starts
    pub fn with_init_script(mut self, script: impl Into<String>) -> Self {
        self.init_script = Some(script.into());
        self
    }

    /// Sentinel the loop answers with
    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    /// Target interpreter
    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// Loop script for the configured interpreter
    pub fn generate_loop_script(&self) -> Result<String, EncodeError> {
        validate_sentinel(&self.sentinel)?;
        match self.interpreter {
            Interpreter::PowerShell { .. } => Ok(powershell_loop(&self.sentinel)),
            Interpreter::Posix { .. } => posix_loop(&self.sentinel),
        }
    }

    /// Init script followed by the loop script
    pub fn payload(&self) -> Result<String, EncodeError> {
        let script = self.generate_loop_script()?;
        Ok(match self.init_script.as_deref() {
            Some(init) if !init.trim().is_empty() => format!("{}\n{}", init, script),
            _ => script,
        })
    }

    /// Command line that starts the loop in the interpreter
    pub fn invocation(&self) -> Result<String, EncodeError> {
        let payload = self.payload()?;
        debug!(
            "Generated {} byte loop payload for {}",
            payload.len(),
            self.interpreter.executable()
        );
        self.interpreter.wrap(&payload)
    }
}

fn powershell_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn powershell_loop(sentinel: &str) -> String {
    let template = r#"$__sfSentinel = __SENTINEL__
$__sfExit = __EXIT__
[Console]::Out.WriteLine($__sfSentinel)
[Console]::Out.Flush()
while ($true) {
    $__sfBuffer = New-Object System.Text.StringBuilder
    while ($true) {
        $__sfLine = [Console]::In.ReadLine()
        if ($null -eq $__sfLine -or $__sfLine -eq $__sfExit) { exit 0 }
        if ($__sfLine -eq $__sfSentinel) { break }
        [void]$__sfBuffer.AppendLine($__sfLine)
    }
    $__sfErrors = @()
    try {
        Invoke-Expression -Command $__sfBuffer.ToString() -ErrorVariable +__sfErrors |
            Out-String -Stream |
            ForEach-Object { [Console]::Out.WriteLine($_) }
    } catch {
        $__sfErrors += $_
    }
    $__sfMessage = (($__sfErrors | ForEach-Object { $_.ToString() }) -join ' ') -replace '[\r\n]+', ' '
    [Console]::Out.WriteLine($__sfSentinel + $__sfMessage.Trim())
    [Console]::Out.Flush()
}
"#;
    template
        .replace("__SENTINEL__", &powershell_literal(sentinel))
        .replace("__EXIT__", &powershell_literal(&format!("{}{}", sentinel, EXIT_SUFFIX)))
}

fn posix_loop(sentinel: &str) -> Result<String, EncodeError> {
    let template = r#"__sf_s=__SENTINEL__
__sf_exit=__EXIT__
__sf_cr=$(printf '\r')
printf '%s\n' "$__sf_s"
while :; do
    __sf_cmd=
    while :; do
        IFS= read -r __sf_line || exit 0
        __sf_line=${__sf_line%"$__sf_cr"}
        [ "$__sf_line" = "$__sf_exit" ] && exit 0
        [ "$__sf_line" = "$__sf_s" ] && break
        __sf_cmd="$__sf_cmd$__sf_line
"
    done
    eval "$__sf_cmd"
    __sf_rc=$?
    if [ "$__sf_rc" -eq 0 ]; then
        printf '%s\n' "$__sf_s"
    else
        printf '%s%s\n' "$__sf_s" "exit status $__sf_rc"
    fi
done
"#;
    let exit_line = format!("{}{}", sentinel, EXIT_SUFFIX);
    Ok(template
        .replace("__SENTINEL__", &shlex::try_quote(sentinel)?)
        .replace("__EXIT__", &shlex::try_quote(&exit_line)?))
}
