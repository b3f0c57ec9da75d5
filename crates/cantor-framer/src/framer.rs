//! The framer trait and the events it produces.

use cantor_core::{FramingConfig, Result};

use crate::prompt::PromptFramer;
use crate::sentinel::SentinelFramer;

/// Error message of an expression whose input was left incomplete.
pub const SYNTAX_ERROR_MESSAGE: &str = "Syntax Error";

/// Outcome of feeding one line to a framer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// The in-flight command finished; the payload is its output
    Completed(String),
    /// The in-flight command finished with an error; the payload is its output
    Failed(String),
    /// The in-flight command was left incomplete and has been force-closed
    SyntaxError,
    /// The interpreter waits for more input; write `force_close` to escape
    Continuation {
        /// Input that terminates the pending statement
        force_close: String,
    },
    /// A resynchronisation requested by [`Framer::begin_resync`] or
    /// [`Framer::resync_after_interrupt`] completed
    Resynced,
    /// Output that belongs to no command
    Stray(String),
}

/// Splits interpreter output into per-command frames.
///
/// The session calls [`Framer::wrap_command`] when it dispatches a command
/// and then feeds every output line to [`Framer::accept_line`] until a
/// terminal event comes back. At most one command is in flight.
pub trait Framer: Send + std::fmt::Debug {
    /// Framer name for debugging/logging.
    fn name(&self) -> &'static str;

    /// Register `command` as in flight and return the bytes to write.
    fn wrap_command(&mut self, command: &str) -> String;

    /// Split a line after every boundary it contains.
    ///
    /// Interpreters print consecutive prompts without a newline in between,
    /// so one line may close several frames. Each returned segment holds at
    /// most one boundary, at its end.
    fn split_line<'a>(&self, line: &'a str) -> Vec<&'a str> {
        vec![line]
    }

    /// Feed one output line (without terminator), or one segment of it.
    fn accept_line(&mut self, line: &str) -> Option<FrameEvent>;

    /// Whether an unterminated tail must be fed now instead of waiting for
    /// its newline. Prompts are printed without one.
    fn accepts_partial(&self, partial: &str) -> bool;

    /// Input that makes the interpreter present a boundary right after
    /// login, if it does not present one on its own.
    fn handshake_command(&self) -> Option<String>;

    /// Drop the in-flight command after an interrupt and return the input
    /// that makes the interpreter present a fresh boundary.
    ///
    /// `signalled` tells whether the interpreter received an interrupt
    /// signal, which may produce a boundary of its own. Output is discarded
    /// until the boundary answering the returned input, reported as
    /// [`FrameEvent::Resynced`]. Each call waits for its own boundary, so
    /// leftovers from an earlier interrupt cannot end it.
    fn resync_after_interrupt(&mut self, signalled: bool) -> Option<String>;

    /// Drop the in-flight command and discard output up to the next boundary,
    /// which is reported as [`FrameEvent::Resynced`].
    fn begin_resync(&mut self);

    /// Whether a resynchronisation is pending.
    fn is_resyncing(&self) -> bool;

    /// Whether a command is in flight.
    fn in_flight(&self) -> bool;

    /// Forget all state, as for a freshly started interpreter.
    fn reset(&mut self);
}

/// Build the framer described by `config`.
pub fn build_framer(config: &FramingConfig) -> Result<Box<dyn Framer>> {
    config.validate()?;
    match config {
        FramingConfig::NumberedPrompt { .. } => {
            Ok(Box::new(PromptFramer::from_config(config)?) as Box<dyn Framer>)
        }
        FramingConfig::Sentinel { .. } => {
            Ok(Box::new(SentinelFramer::from_config(config)?) as Box<dyn Framer>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cantor_core::{BackendProfile, Error};

    #[test]
    fn test_build_builtin_framers() {
        let octave = build_framer(&BackendProfile::octave().framing).unwrap();
        assert_eq!(octave.name(), "numbered_prompt");
        assert!(octave.handshake_command().is_none());

        let scilab = build_framer(&BackendProfile::scilab().framing).unwrap();
        assert_eq!(scilab.name(), "sentinel");
        assert!(scilab.handshake_command().is_some());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = FramingConfig::numbered_prompt("P:([0-9]+> ", None);
        assert!(matches!(
            build_framer(&config),
            Err(Error::InvalidPattern { .. })
        ));
    }
}
