//! Sentinel framing.
//!
//! Interpreters without a usable prompt are driven by bracketing every
//! command with two statements that print fixed markers. Output between the
//! begin and end markers belongs to the command.

use cantor_core::{Error, FramingConfig, Result};
use tracing::{debug, trace};

use crate::framer::{FrameEvent, Framer};

#[derive(Debug, Default)]
struct Frame {
    seen_begin: bool,
    output: String,
}

/// Framer bracketing commands with marker-printing statements.
#[derive(Debug)]
pub struct SentinelFramer {
    begin: String,
    end: String,
    sync: String,
    print_template: String,
    frame: Option<Frame>,
    /// Marker ending the pending resynchronisation
    expected_sync: Option<String>,
    syncs: u64,
}

impl SentinelFramer {
    /// Framer for a `Sentinel` configuration.
    pub fn from_config(config: &FramingConfig) -> Result<Self> {
        match config {
            FramingConfig::Sentinel {
                begin,
                end,
                sync,
                print_template,
            } => Ok(Self {
                begin: begin.clone(),
                end: end.clone(),
                sync: sync.clone(),
                print_template: print_template.clone(),
                frame: None,
                expected_sync: None,
                syncs: 0,
            }),
            FramingConfig::NumberedPrompt { .. } => Err(Error::Config(
                "sentinel framer needs a sentinel configuration".to_string(),
            )),
        }
    }

    /// Statement printing `marker`.
    fn print(&self, marker: &str) -> String {
        self.print_template.replace("{marker}", marker)
    }
}

impl Framer for SentinelFramer {
    fn name(&self) -> &'static str {
        "sentinel"
    }

    fn wrap_command(&mut self, command: &str) -> String {
        self.frame = Some(Frame::default());
        format!(
            "{}\n{}\n{}\n",
            self.print(&self.begin),
            command.trim(),
            self.print(&self.end)
        )
    }

    fn accept_line(&mut self, line: &str) -> Option<FrameEvent> {
        trace!("Framing line: {:?}", line);

        // Echoed print statements end in the template's closing syntax, so
        // only a line ending with the bare marker is a boundary.
        if let Some(sync) = &self.expected_sync {
            if line.ends_with(sync.as_str()) {
                debug!("Resynchronised on sync marker {}", sync);
                self.expected_sync = None;
                return Some(FrameEvent::Resynced);
            }
            return None;
        }

        let Some(frame) = self.frame.as_mut() else {
            return Some(FrameEvent::Stray(line.to_string()));
        };

        if !frame.seen_begin {
            if line.ends_with(self.begin.as_str()) {
                frame.seen_begin = true;
                return None;
            }
            return Some(FrameEvent::Stray(line.to_string()));
        }

        if let Some(prefix) = line.strip_suffix(self.end.as_str()) {
            if !prefix.is_empty() {
                frame.output.push_str(prefix);
                frame.output.push('\n');
            }
            let frame = self.frame.take()?;
            return Some(FrameEvent::Completed(frame.output));
        }

        frame.output.push_str(line);
        frame.output.push('\n');
        None
    }

    fn accepts_partial(&self, _partial: &str) -> bool {
        false
    }

    fn handshake_command(&self) -> Option<String> {
        Some(format!("{}\n", self.print(&self.sync)))
    }

    fn resync_after_interrupt(&mut self, _signalled: bool) -> Option<String> {
        self.frame = None;
        self.syncs += 1;
        let sync = format!("{}-{}", self.sync, self.syncs);
        // Leading newline terminates a half-written statement
        let input = format!("\n{}\n", self.print(&sync));
        self.expected_sync = Some(sync);
        Some(input)
    }

    fn begin_resync(&mut self) {
        self.frame = None;
        self.expected_sync = Some(self.sync.clone());
    }

    fn is_resyncing(&self) -> bool {
        self.expected_sync.is_some()
    }

    fn in_flight(&self) -> bool {
        self.frame.is_some()
    }

    fn reset(&mut self) {
        self.frame = None;
        self.expected_sync = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cantor_core::BackendProfile;

    fn scilab() -> SentinelFramer {
        SentinelFramer::from_config(&BackendProfile::scilab().framing).unwrap()
    }

    #[test]
    fn test_wrap_command() {
        let mut framer = scilab();
        let wrapped = framer.wrap_command("  disp(1)\n");
        assert_eq!(
            wrapped,
            "printf('begin-cantor-scilab-command-processing\\n')\n\
             disp(1)\n\
             printf('terminated-cantor-scilab-command-processing\\n')\n"
        );
        assert!(framer.in_flight());
    }

    #[test]
    fn test_output_between_markers() {
        let mut framer = scilab();
        framer.wrap_command("disp(1); disp(2)");
        assert_eq!(
            framer.accept_line("begin-cantor-scilab-command-processing"),
            None
        );
        assert_eq!(framer.accept_line(""), None);
        assert_eq!(framer.accept_line(" 1."), None);
        assert_eq!(framer.accept_line(" 2."), None);
        assert_eq!(
            framer.accept_line("terminated-cantor-scilab-command-processing"),
            Some(FrameEvent::Completed("\n 1.\n 2.\n".to_string()))
        );
        assert!(!framer.in_flight());
    }

    #[test]
    fn test_end_marker_after_unterminated_output() {
        let mut framer = scilab();
        framer.wrap_command("mprintf('x')");
        framer.accept_line("begin-cantor-scilab-command-processing");
        assert_eq!(
            framer.accept_line("xterminated-cantor-scilab-command-processing"),
            Some(FrameEvent::Completed("x\n".to_string()))
        );
    }

    #[test]
    fn test_echoed_statement_is_not_a_boundary() {
        let mut framer = scilab();
        framer.wrap_command("1");
        framer.accept_line("begin-cantor-scilab-command-processing");
        assert_eq!(
            framer.accept_line("--> printf('terminated-cantor-scilab-command-processing\\n')"),
            None
        );
    }

    #[test]
    fn test_stray_lines() {
        let mut framer = scilab();
        assert_eq!(
            framer.accept_line("banner"),
            Some(FrameEvent::Stray("banner".to_string()))
        );
        framer.wrap_command("1");
        assert_eq!(
            framer.accept_line("old output"),
            Some(FrameEvent::Stray("old output".to_string()))
        );
    }

    #[test]
    fn test_handshake_and_resync() {
        let mut framer = scilab();
        assert_eq!(
            framer.handshake_command().as_deref(),
            Some("printf('sync-cantor-scilab-command-processing\\n')\n")
        );

        framer.wrap_command("sleep(10000)");
        framer.accept_line("begin-cantor-scilab-command-processing");
        framer.begin_resync();
        assert!(framer.is_resyncing());
        assert_eq!(
            framer.accept_line("terminated-cantor-scilab-command-processing"),
            None
        );
        assert_eq!(
            framer.accept_line("sync-cantor-scilab-command-processing"),
            Some(FrameEvent::Resynced)
        );
        assert!(!framer.is_resyncing());
        assert!(!framer.in_flight());
    }

    #[test]
    fn test_each_interrupt_has_its_own_marker() {
        let mut framer = scilab();
        framer.wrap_command("sleep(10000)");
        let first = framer.resync_after_interrupt(true).unwrap();
        assert_eq!(
            first,
            "\nprintf('sync-cantor-scilab-command-processing-1\\n')\n"
        );
        assert!(!framer.in_flight());

        framer.wrap_command("sleep(10000)");
        framer.resync_after_interrupt(true);
        assert_eq!(
            framer.accept_line("sync-cantor-scilab-command-processing-1"),
            None
        );
        assert_eq!(
            framer.accept_line("sync-cantor-scilab-command-processing"),
            None
        );
        assert_eq!(
            framer.accept_line("sync-cantor-scilab-command-processing-2"),
            Some(FrameEvent::Resynced)
        );
        assert!(!framer.is_resyncing());
    }

    #[test]
    fn test_never_accepts_partial() {
        let framer = scilab();
        assert!(!framer.accepts_partial("terminated-cantor-scilab-command-processing"));
    }

    #[test]
    fn test_rejects_prompt_config() {
        let config = BackendProfile::octave().framing;
        assert!(SentinelFramer::from_config(&config).is_err());
    }
}
