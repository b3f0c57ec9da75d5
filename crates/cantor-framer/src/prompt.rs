//! Numbered prompt framing.
//!
//! The interpreter is started with a custom prompt such as
//! `CANTOR_OCTAVE_BACKEND_PROMPT:7> ` whose number is the interpreter's
//! command counter. Every input line is answered by exactly one prompt or
//! continuation prompt, so a command of `n` lines is complete after `n`
//! answers. A successful line advances the counter by one; a counter that
//! did not advance by exactly one means the command failed.

use cantor_core::backend::compile;
use cantor_core::{Error, FramingConfig, Result};
use regex::Regex;
use tracing::{debug, trace};

use crate::framer::{FrameEvent, Framer};

/// State of the command in flight.
#[derive(Debug)]
struct Frame {
    command: String,
    /// Prompts still expected before the frame closes
    remaining: usize,
    /// Blank commands do not advance the counter
    counts: bool,
    output: String,
    skipped: bool,
    incomplete: bool,
}

/// What ends a pending resynchronisation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resync {
    Off,
    /// This many more prompts
    Prompts(usize),
    /// A line ending with the marker, then the next prompt
    Marker(String),
    /// Marker seen, the next prompt ends it
    MarkerSeen,
}

/// Framer for interpreters printing a numbered custom prompt.
#[derive(Debug)]
pub struct PromptFramer {
    prompt: Regex,
    subprompt: Option<Regex>,
    force_close: String,
    interrupt_sync: String,
    sync_statement: Option<String>,
    skip_check_exempt: Vec<String>,
    last_number: Option<u64>,
    frame: Option<Frame>,
    resync: Resync,
    syncs: u64,
}

impl PromptFramer {
    /// Framer with default escape sequences and no exemptions.
    pub fn new(prompt: &str, subprompt: Option<&str>) -> Result<Self> {
        Self::from_config(&FramingConfig::numbered_prompt(prompt, subprompt))
    }

    /// Framer for a `NumberedPrompt` configuration.
    pub fn from_config(config: &FramingConfig) -> Result<Self> {
        match config {
            FramingConfig::NumberedPrompt {
                prompt,
                subprompt,
                force_close,
                interrupt_sync,
                sync_statement,
                skip_check_exempt,
            } => Ok(Self {
                prompt: compile(prompt)?,
                subprompt: subprompt.as_deref().map(compile).transpose()?,
                force_close: force_close.clone(),
                interrupt_sync: interrupt_sync.clone(),
                sync_statement: sync_statement.clone(),
                skip_check_exempt: skip_check_exempt.clone(),
                last_number: None,
                frame: None,
                resync: Resync::Off,
                syncs: 0,
            }),
            FramingConfig::Sentinel { .. } => Err(Error::Config(
                "prompt framer needs a numbered_prompt configuration".to_string(),
            )),
        }
    }

    /// Sequence number of the last prompt seen.
    pub fn last_number(&self) -> Option<u64> {
        self.last_number
    }

    /// End offsets of every prompt and subprompt in `line`, ascending.
    fn boundary_ends(&self, line: &str) -> Vec<usize> {
        let mut ends: Vec<usize> = self
            .prompt
            .find_iter(line)
            .chain(self.subprompt.iter().flat_map(|re| re.find_iter(line)))
            .filter(|m| !m.is_empty())
            .map(|m| m.end())
            .collect();
        ends.sort_unstable();
        ends.dedup();
        ends
    }

    fn is_exempt(&self, command: &str) -> bool {
        self.skip_check_exempt
            .iter()
            .any(|needle| command.contains(needle.as_str()))
    }

    fn on_prompt(&mut self, number: Option<u64>, prefix: &str) -> Option<FrameEvent> {
        if self.resync != Resync::Off {
            self.last_number = number.or(self.last_number);
            if let Resync::Marker(marker) = &self.resync {
                if !prefix.ends_with(marker.as_str()) {
                    trace!("Discarding prompt {:?} before the sync marker", number);
                    return None;
                }
            }
            if let Resync::Prompts(remaining) = &mut self.resync {
                *remaining = remaining.saturating_sub(1);
                if *remaining > 0 {
                    trace!("Discarding prompt {:?}, {} to go", number, remaining);
                    return None;
                }
            }
            debug!("Resynchronised at prompt {:?}", number);
            self.resync = Resync::Off;
            return Some(FrameEvent::Resynced);
        }

        let previous = self.last_number;
        self.last_number = number.or(previous);

        let exempt = self
            .frame
            .as_ref()
            .is_some_and(|frame| !frame.counts || self.is_exempt(&frame.command));

        let Some(frame) = self.frame.as_mut() else {
            return Some(FrameEvent::Stray(prefix.to_string()));
        };

        if !prefix.is_empty() {
            frame.output.push_str(prefix);
            frame.output.push('\n');
        }

        if let (Some(previous), Some(number)) = (previous, number) {
            if !exempt && number != previous + 1 {
                debug!("Prompt number skipped: {} -> {}", previous, number);
                frame.skipped = true;
            }
        }

        frame.remaining = frame.remaining.saturating_sub(1);
        if frame.remaining > 0 {
            return None;
        }

        let frame = self.frame.take()?;
        Some(if frame.incomplete {
            FrameEvent::SyntaxError
        } else if frame.skipped {
            FrameEvent::Failed(frame.output)
        } else {
            FrameEvent::Completed(frame.output)
        })
    }

    fn on_subprompt(&mut self, prefix: &str) -> Option<FrameEvent> {
        if self.resync != Resync::Off {
            return None;
        }

        let force_close = self.force_close.clone();
        let Some(frame) = self.frame.as_mut() else {
            return Some(FrameEvent::Stray(prefix.to_string()));
        };

        if !prefix.is_empty() {
            frame.output.push_str(prefix);
            frame.output.push('\n');
        }

        if frame.remaining > 1 {
            // Inside a multi-line statement whose remaining lines are on their way
            frame.remaining -= 1;
            return None;
        }

        debug!("Incomplete input, forcing it closed: {:?}", frame.command);
        frame.incomplete = true;
        frame.remaining = force_close.matches('\n').count().max(1);
        Some(FrameEvent::Continuation { force_close })
    }
}

/// Number in the first capture group, if it parses.
fn sequence_number(regex: &Regex, line: &str) -> Option<(Option<u64>, usize)> {
    let captures = regex.captures(line)?;
    let start = captures.get(0).map_or(0, |m| m.start());
    let number = captures.get(1).and_then(|m| m.as_str().parse().ok());
    Some((number, start))
}

impl Framer for PromptFramer {
    fn name(&self) -> &'static str {
        "numbered_prompt"
    }

    fn wrap_command(&mut self, command: &str) -> String {
        let lines: Vec<&str> = command
            .lines()
            .filter(|line| !line.trim().is_empty())
            .collect();

        let (wrapped, remaining, counts) = if lines.is_empty() {
            ("\n".to_string(), 1, false)
        } else {
            (format!("{}\n", lines.join("\n")), lines.len(), true)
        };

        self.frame = Some(Frame {
            command: command.to_string(),
            remaining,
            counts,
            output: String::new(),
            skipped: false,
            incomplete: false,
        });
        wrapped
    }

    fn accept_line(&mut self, line: &str) -> Option<FrameEvent> {
        trace!("Framing line: {:?}", line);

        if let Some((number, start)) = sequence_number(&self.prompt, line) {
            return self.on_prompt(number, &line[..start]);
        }

        if let Some(subprompt) = &self.subprompt {
            if let Some(m) = subprompt.find(line) {
                let prefix = line[..m.start()].to_string();
                return self.on_subprompt(&prefix);
            }
        }

        if let Resync::Marker(marker) = &self.resync {
            if line.ends_with(marker.as_str()) {
                debug!("Sync marker seen, waiting for the next prompt");
                self.resync = Resync::MarkerSeen;
                return None;
            }
        }
        if self.resync != Resync::Off {
            trace!("Discarding output while resynchronising");
            return None;
        }

        match self.frame.as_mut() {
            Some(frame) => {
                frame.output.push_str(line);
                frame.output.push('\n');
                None
            }
            None => Some(FrameEvent::Stray(line.to_string())),
        }
    }

    fn split_line<'a>(&self, line: &'a str) -> Vec<&'a str> {
        let mut segments = Vec::new();
        let mut start = 0;
        for end in self.boundary_ends(line) {
            if end > start {
                segments.push(&line[start..end]);
                start = end;
            }
        }
        if start < line.len() || segments.is_empty() {
            segments.push(&line[start..]);
        }
        segments
    }

    fn accepts_partial(&self, partial: &str) -> bool {
        self.boundary_ends(partial).last() == Some(&partial.len())
    }

    fn handshake_command(&self) -> Option<String> {
        None
    }

    fn resync_after_interrupt(&mut self, signalled: bool) -> Option<String> {
        self.frame = None;
        self.syncs += 1;

        if let Some(statement) = &self.sync_statement {
            let marker = format!("CANTOR_SYNC_{}", self.syncs);
            let input = format!("{}\n", statement.replace("{marker}", &marker));
            self.resync = Resync::Marker(marker);
            return Some(input);
        }

        // The signal and every line of the sync input are each answered by a prompt
        let prompts = usize::from(signalled) + self.interrupt_sync.matches('\n').count();
        if prompts == 0 {
            self.resync = Resync::Off;
            return None;
        }
        self.resync = Resync::Prompts(prompts);
        (!self.interrupt_sync.is_empty()).then(|| self.interrupt_sync.clone())
    }

    fn begin_resync(&mut self) {
        self.frame = None;
        self.resync = Resync::Prompts(1);
    }

    fn is_resyncing(&self) -> bool {
        self.resync != Resync::Off
    }

    fn in_flight(&self) -> bool {
        self.frame.is_some()
    }

    fn reset(&mut self) {
        self.last_number = None;
        self.frame = None;
        self.resync = Resync::Off;
    }
}
