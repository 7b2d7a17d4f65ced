//! Sentinel framing and response scanning
//!
//! The interpreter loop reads command text line by line until it sees a line
//! holding only the sentinel, evaluates what it collected, and answers with a
//! line made of the sentinel followed by the evaluation error text (empty on
//! success). Everything written before that answer line is command output.
//!
//! The sentinel must never appear in legitimate command output.

use crate::EncodeError;

/// Default sentinel marking command boundaries
pub const DEFAULT_SENTINEL: &str = ":::Sh3llFr4m3S3nt1n3l:::";

/// Line terminator used on the command channel
pub const LINE_END: &str = "\r\n";

/// Suffix that turns a sentinel line into a loop exit request
pub const EXIT_SUFFIX: &str = " exit";

/// Check that a sentinel can frame commands
pub fn validate_sentinel(sentinel: &str) -> Result<(), EncodeError> {
    if sentinel.trim().is_empty() {
        return Err(EncodeError::InvalidSentinel("sentinel is empty".to_string()));
    }
    if sentinel.contains(&['\r', '\n'][..]) {
        return Err(EncodeError::InvalidSentinel(
            "sentinel contains a line break".to_string(),
        ));
    }
    Ok(())
}

/// Command text followed by the end-of-command sentinel line
pub fn frame_command(command_line: &str, sentinel: &str) -> String {
    let mut framed = String::with_capacity(command_line.len() + sentinel.len() + 4);
    framed.push_str(command_line);
    framed.push_str(LINE_END);
    framed.push_str(sentinel);
    framed.push_str(LINE_END);
    framed
}

/// Line that asks the interpreter loop to exit
pub fn exit_request(sentinel: &str) -> String {
    format!("{}{}{}", sentinel, EXIT_SUFFIX, LINE_END)
}

/// Whether a prompt message reports a failure
pub fn is_error_message(message: &str) -> bool {
    !message.trim().is_empty()
}

/// Incremental splitter for the stdout of one framed command.
///
/// Text before the first sentinel is command output. Text after it, up to the
/// next line feed, is the prompt message. The sentinel and the line feed may
/// arrive split across any number of chunks.
#[derive(Debug, Clone)]
pub struct ResponseScanner {
    sentinel: String,
    /// Text that may still be the start of a sentinel or of the prompt line
    pending: String,
    stdout: String,
    sentinel_seen: bool,
    prompt: Option<String>,
}

impl ResponseScanner {
    /// Create a scanner for a sentinel
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
            pending: String::new(),
            stdout: String::new(),
            sentinel_seen: false,
            prompt: None,
        }
    }

    /// Feed the next stdout chunk.
    ///
    /// Returns the prompt message once the whole response line has been seen.
    /// Input after the response line is ignored.
    pub fn feed(&mut self, chunk: &str) -> Option<&str> {
        if self.prompt.is_some() {
            return self.prompt.as_deref();
        }
        self.pending.push_str(chunk);

        if !self.sentinel_seen {
            match self.pending.find(&self.sentinel) {
                Some(index) => {
                    self.stdout.push_str(&self.pending[..index]);
                    self.pending.drain(..index + self.sentinel.len());
                    self.sentinel_seen = true;
                }
                None => {
                    self.release_safe_prefix();
                    return None;
                }
            }
        }

        let eol = self.pending.find('\n')?;
        let message = self.pending[..eol].trim_end_matches('\r').to_string();
        self.pending.clear();
        self.prompt = Some(message);
        self.prompt.as_deref()
    }

    /// Whether the sentinel has been seen
    pub fn sentinel_seen(&self) -> bool {
        self.sentinel_seen
    }

    /// Whether the response line is complete
    pub fn is_complete(&self) -> bool {
        self.prompt.is_some()
    }

    /// Output confirmed to precede the sentinel so far
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Consume the scanner once the stream has ended.
    ///
    /// Held-back text is output if no sentinel was seen. A partial prompt line
    /// becomes the prompt message.
    pub fn finish(mut self) -> (String, Option<String>) {
        if self.prompt.is_none() {
            if self.sentinel_seen {
                let message = self.pending.trim_end_matches(&['\r', '\n'][..]).to_string();
                self.prompt = Some(message);
            } else {
                self.stdout.push_str(&self.pending);
            }
        }
        (self.stdout, self.prompt)
    }

    /// Move everything that cannot be the start of a sentinel into stdout
    fn release_safe_prefix(&mut self) {
        let keep = self.sentinel.len().saturating_sub(1).min(self.pending.len());
        let mut cut = self.pending.len() - keep;
        while !self.pending.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut > 0 {
            self.stdout.push_str(&self.pending[..cut]);
            self.pending.drain(..cut);
        }
    }
}
