//! Removal of terminal control sequences from PTY output using the VTE crate.

use vte::Perform;

/// Turns a raw terminal byte stream into plain text.
///
/// Printable characters, line feeds, carriage returns and tabs are kept;
/// CSI/OSC/DCS sequences are dropped and a backspace erases the previous
/// character. Parser state survives between calls, so escape sequences split
/// across reads are handled.
pub struct AnsiStripper {
    parser: vte::Parser,
    sink: TextSink,
}

impl std::fmt::Debug for AnsiStripper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnsiStripper")
            .field("pending", &self.sink.text.len())
            .finish_non_exhaustive()
    }
}

impl Default for AnsiStripper {
    fn default() -> Self {
        Self::new()
    }
}

impl AnsiStripper {
    /// Create a stripper in ground state.
    pub fn new() -> Self {
        Self {
            parser: vte::Parser::new(),
            sink: TextSink::default(),
        }
    }

    /// Feed raw bytes, returning the plain text they contain.
    pub fn strip(&mut self, bytes: &[u8]) -> Vec<u8> {
        for byte in bytes {
            self.parser.advance(&mut self.sink, *byte);
        }
        std::mem::take(&mut self.sink.text).into_bytes()
    }
}

#[derive(Debug, Default)]
struct TextSink {
    text: String,
}

impl Perform for TextSink {
    fn print(&mut self, c: char) {
        self.text.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' | b'\r' | b'\t' => self.text.push(byte as char),
            // Backspace (BS)
            0x08 => {
                self.text.pop();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(input: &[u8]) -> String {
        String::from_utf8(AnsiStripper::new().strip(input)).unwrap()
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(strip(b"ans = 2\r\n"), "ans = 2\r\n");
    }

    #[test]
    fn test_sgr_removed() {
        assert_eq!(strip(b"\x1b[1;31merror:\x1b[0m x undefined\n"), "error: x undefined\n");
    }

    #[test]
    fn test_osc_title_removed() {
        assert_eq!(strip(b"\x1b]0;octave\x07PROMPT:1> "), "PROMPT:1> ");
    }

    #[test]
    fn test_bracketed_paste_toggle_removed() {
        assert_eq!(strip(b"\x1b[?2004hP:3> "), "P:3> ");
    }

    #[test]
    fn test_backspace_erases() {
        assert_eq!(strip(b"abc\x08\x08d"), "ad");
    }

    #[test]
    fn test_sequence_split_across_reads() {
        let mut stripper = AnsiStripper::new();
        let first = stripper.strip(b"x\x1b[3");
        let second = stripper.strip(b"2my\n");
        assert_eq!(first, b"x");
        assert_eq!(second, b"y\n");
    }

    #[test]
    fn test_utf8_preserved() {
        assert_eq!(strip("π ≈ 3.14\n".as_bytes()), "π ≈ 3.14\n");
    }
}
