//! Line assembly over chunked reads.
//!
//! Reads end wherever the OS pipe buffer happened to end, but framing works on
//! lines. [`LineAssembler`] keeps the unterminated tail between reads and
//! hands it out on request: prompts are printed without a trailing newline,
//! so the framer must be able to look at them before the next line arrives.

use std::collections::VecDeque;

/// Splits a byte stream into lines.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: Vec<u8>,
}

impl LineAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every line they complete.
    ///
    /// Lines are returned without their terminator; `\r\n` counts as one
    /// terminator. Invalid UTF-8 is replaced.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            lines.push(decode(&self.buffer[start..end]));
            start = end + 1;
        }
        self.buffer.drain(..start);
        lines
    }

    /// The unterminated tail, if any.
    pub fn partial(&self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(decode(&self.buffer))
        }
    }

    /// Remove and return the unterminated tail.
    pub fn take_partial(&mut self) -> Option<String> {
        let partial = self.partial();
        self.buffer.clear();
        partial
    }

    /// Whether bytes are waiting for a terminator.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Discard buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Drops the terminal's echo of written input.
///
/// A terminal echoes input as soon as it is written, ahead of anything the
/// interpreter prints in response. Every written line is remembered; output
/// lines are matched against them in order, and the first line that does not
/// match ends the echo for that write.
#[derive(Debug, Default)]
pub struct EchoFilter {
    expected: VecDeque<String>,
}

impl EchoFilter {
    /// Create a filter expecting nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the lines of `input` as upcoming echo.
    pub fn expect(&mut self, input: &str) {
        self.expected.extend(
            input
                .split('\n')
                .map(|line| line.trim_end_matches('\r'))
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
    }

    /// Whether `line` is echo and should be dropped.
    ///
    /// An echoed line may carry a prompt in front of it, so a suffix match
    /// counts.
    pub fn is_echo(&mut self, line: &str) -> bool {
        match self.expected.front() {
            Some(front) if line == front || line.ends_with(front.as_str()) => {
                self.expected.pop_front();
                true
            }
            Some(_) => {
                self.expected.clear();
                false
            }
            None => false,
        }
    }

    /// Forget pending echo.
    pub fn clear(&mut self) {
        self.expected.clear();
    }
}
