//! The single-threaded session core.
//!
//! [`SessionEngine`] owns the transport, the framer and the expression
//! queue. It never blocks and never spawns: the session task feeds it
//! transport output and caller requests one at a time, and collects the
//! [`SessionEvent`]s it produced afterwards.

use std::collections::VecDeque;
use std::path::PathBuf;

use cantor_core::{
    BackendProfile, Error, ExpressionId, ExpressionResult, ExpressionSnapshot, ExpressionStatus,
    FinishingBehavior, Result, SessionStatus, TransportKind,
};
use cantor_framer::{build_framer, FrameEvent, Framer, SYNTAX_ERROR_MESSAGE};
use cantor_transport::{EchoFilter, LineAssembler, Transport};
use regex::Regex;
use tracing::{debug, error, info, trace, warn};

use crate::expression::ExpressionHandle;
use crate::session::SessionEvent;
use crate::table::ExpressionTable;
use crate::transcript::{Stream, Transcript};

/// Message of a failed command that printed nothing.
const GENERIC_ERROR_MESSAGE: &str = "Error while evaluating the command";

/// How the framer closed the head expression.
#[derive(Debug)]
enum Outcome {
    Completed(String),
    Failed(String),
    SyntaxError,
}

/// Session state machine over one interpreter process.
#[derive(Debug)]
pub struct SessionEngine {
    profile: BackendProfile,
    framer: Box<dyn Framer>,
    noop: Option<Regex>,
    transport: Option<Box<dyn Transport>>,
    stdout: LineAssembler,
    echo: Option<EchoFilter>,
    queue: VecDeque<ExpressionId>,
    /// Failed without error text; waits for late standard error
    held: Option<ExpressionId>,
    table: ExpressionTable,
    status: SessionStatus,
    logging_out: bool,
    transcript: Option<Transcript>,
    failure: Option<Error>,
    events: Vec<SessionEvent>,
}

impl SessionEngine {
    /// Engine for `profile`, not yet attached to a process.
    pub fn new(profile: BackendProfile) -> Result<Self> {
        profile.validate()?;
        let framer = build_framer(&profile.framing)?;
        let noop = profile.noop_regex()?;
        let echo = (profile.transport == TransportKind::Pty).then(EchoFilter::new);

        Ok(Self {
            profile,
            framer,
            noop,
            transport: None,
            stdout: LineAssembler::new(),
            echo,
            queue: VecDeque::new(),
            held: None,
            table: ExpressionTable::new(),
            status: SessionStatus::Disabled,
            logging_out: false,
            transcript: None,
            failure: None,
            events: Vec::new(),
        })
    }

    /// Keep at most `retention` finished expressions for lookup.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.table = ExpressionTable::with_retention(retention);
        self
    }

    /// Backend profile.
    pub fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    /// Current session status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Expressions waiting or computing.
    pub fn pending(&self) -> usize {
        self.queue.len() + usize::from(self.held.is_some())
    }

    /// Whether a failed expression waits for its error text.
    pub fn has_held_failure(&self) -> bool {
        self.held.is_some()
    }

    /// Give up waiting for the error text of a held failure and move on.
    pub fn release_held_failure(&mut self) {
        if self.settle_held() {
            self.run_first_expression();
        }
    }

    /// Whether a logout is in progress.
    pub fn is_logging_out(&self) -> bool {
        self.logging_out
    }

    /// Handle to a known expression.
    pub fn handle(&self, id: ExpressionId) -> Option<ExpressionHandle> {
        self.table.handle(id)
    }

    /// Snapshot of a known expression.
    pub fn snapshot(&self, id: ExpressionId) -> Option<ExpressionSnapshot> {
        self.table.snapshot(id)
    }

    /// Events produced since the last call.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// The error that disabled the session, once.
    pub fn take_failure(&mut self) -> Option<Error> {
        self.failure.take()
    }

    /// Start recording a transcript of the traffic.
    pub fn start_transcript(&mut self) {
        self.transcript = Some(Transcript::new(&self.profile.name, &self.profile.program));
    }

    /// Current transcript.
    pub fn transcript(&self) -> Option<&Transcript> {
        self.transcript.as_ref()
    }

    /// Stop recording and hand out the transcript.
    pub fn take_transcript(&mut self) -> Option<Transcript> {
        self.transcript.take()
    }

    /// Attach a freshly spawned interpreter and wait for its first boundary.
    pub fn login_started(&mut self, transport: Box<dyn Transport>) {
        info!(
            "Logging in to {} (pid {:?})",
            self.profile.name,
            transport.pid()
        );
        self.transport = Some(transport);
        self.logging_out = false;
        self.clear_input_state();
        self.framer.reset();
        self.framer.begin_resync();
        self.set_status(SessionStatus::LoginStarted);

        if let Some(handshake) = self.framer.handshake_command() {
            if let Err(err) = self.write(&handshake) {
                self.fail_session(err);
            }
        }
    }

    /// The interpreter presented its first boundary.
    pub fn login_complete(&mut self) {
        if self.status != SessionStatus::LoginStarted {
            return;
        }
        info!("Logged in to {}", self.profile.name);
        self.set_status(SessionStatus::Done);
        self.events.push(SessionEvent::LoginDone);

        if let Some(autorun) = self.profile.autorun_command() {
            debug!("Queueing autorun statements for {}", self.profile.name);
            let handle = self
                .table
                .create(autorun, FinishingBehavior::DeleteOnFinish, true);
            self.queue.push_front(handle.id());
        }
        self.run_first_expression();
    }

    /// Queue `command`; it is dispatched at once if nothing else is pending.
    pub fn enqueue(
        &mut self,
        command: &str,
        finishing_behavior: FinishingBehavior,
        internal: bool,
    ) -> Result<ExpressionHandle> {
        if self.status == SessionStatus::Disabled || self.logging_out {
            return Err(Error::SessionDisabled);
        }

        let handle = self.table.create(command, finishing_behavior, internal);
        debug!("Queued expression {}: {:?}", handle.id(), command);
        self.queue.push_back(handle.id());
        if self.queue.len() == 1 {
            self.run_first_expression();
        }
        Ok(handle)
    }

    /// Dispatch the head of the queue if the interpreter is free.
    pub fn run_first_expression(&mut self) {
        while self.can_dispatch() {
            let Some(&id) = self.queue.front() else {
                if self.status == SessionStatus::Running {
                    self.set_status(SessionStatus::Done);
                }
                return;
            };
            let Some(command) = self.table.get(id).map(|r| r.command().to_string()) else {
                self.queue.pop_front();
                continue;
            };

            if self.is_noop(&command) {
                debug!("Expression {} needs no evaluation", id);
                self.queue.pop_front();
                self.table.set_status(id, ExpressionStatus::Computing);
                self.finish(id, ExpressionStatus::Done);
                continue;
            }

            let wrapped = self.framer.wrap_command(&self.profile.prepare_command(&command));
            self.table
                .with(id, |record| record.set_internal_command(wrapped.as_str()));
            self.table.set_status(id, ExpressionStatus::Computing);
            self.set_status(SessionStatus::Running);
            debug!("Running expression {}", id);
            if let Err(err) = self.write(&wrapped) {
                self.fail_session(err);
            }
            return;
        }
    }

    /// Feed standard output.
    pub fn on_stdout(&mut self, bytes: &[u8]) {
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.record(Stream::Output, bytes);
        }
        // Anything the interpreter prints after a failure comes after its error text
        if !bytes.is_empty() {
            self.release_held_failure();
        }

        for line in self.stdout.push(bytes) {
            self.accept_segments(&line);
        }

        if let Some(partial) = self.stdout.partial() {
            if self.framer.accepts_partial(&partial) {
                self.stdout.clear();
                self.accept_segments(&partial);
            }
        }
    }

    /// Feed standard error.
    ///
    /// It belongs to a held failure if there is one, otherwise to the
    /// computing expression.
    pub fn on_stderr(&mut self, bytes: &[u8]) {
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.record(Stream::Error, bytes);
        }

        let text = String::from_utf8_lossy(bytes);
        match self.held.or_else(|| self.computing_head()) {
            Some(id) => self.table.with(id, |record| record.append_stderr(&text)),
            None => debug!("Discarding standard error outside any expression: {:?}", text),
        }
    }

    /// The interpreter's output reached end of file.
    pub fn on_closed(&mut self) {
        if self.transport.is_none() {
            return;
        }
        if self.logging_out {
            debug!("Interpreter closed its output during logout");
            return;
        }

        let code = self
            .transport
            .as_mut()
            .and_then(|transport| transport.try_wait().ok().flatten())
            .and_then(|exit| exit.code);
        self.fail_session(Error::ProcessExited { code });
    }

    /// Interrupt the computing expression and drop everything queued.
    pub fn interrupt(&mut self) {
        self.settle_held();
        let computing = self.computing_head().is_some();
        if self.queue.is_empty() {
            if self.status == SessionStatus::Running {
                self.set_status(SessionStatus::Done);
            }
            return;
        }

        info!(
            "Interrupting {} expression(s) on {}",
            self.queue.len(),
            self.profile.name
        );
        let mut signalled = false;
        if computing {
            if let Some(transport) = self.transport.as_mut() {
                match transport.interrupt() {
                    Ok(()) => signalled = true,
                    Err(err) => warn!("Failed to interrupt interpreter: {}", err),
                }
            }
        }

        for id in std::mem::take(&mut self.queue) {
            self.finish(id, ExpressionStatus::Interrupted);
        }

        if computing {
            // Output still on its way belongs to the interrupted command.
            let sync = self.framer.resync_after_interrupt(signalled);
            self.clear_input_state();
            if let Some(sync) = sync {
                if let Err(err) = self.write(&sync) {
                    self.fail_session(err);
                    return;
                }
            }
        }

        if self.status == SessionStatus::Running {
            self.set_status(SessionStatus::Done);
        }
    }

    /// Ask the interpreter to quit.
    ///
    /// Returns `false` when no interpreter is attached, in which case the
    /// logout is already complete.
    pub fn logout_begin(&mut self) -> bool {
        if self.transport.is_none() {
            self.set_status(SessionStatus::Disabled);
            return false;
        }
        if self.logging_out {
            return true;
        }

        info!("Logging out of {}", self.profile.name);
        self.settle_held();
        for id in std::mem::take(&mut self.queue) {
            self.finish(id, ExpressionStatus::Interrupted);
        }
        self.logging_out = true;

        let exit_command = self.profile.exit_command.clone();
        if let Err(err) = self.write(&exit_command) {
            warn!("Failed to send exit command: {}", err);
        }
        true
    }

    /// Whether the interpreter process is gone.
    pub fn has_exited(&mut self) -> bool {
        match self.transport.as_mut() {
            Some(transport) => !matches!(transport.try_wait(), Ok(None)),
            None => true,
        }
    }

    /// Reap or kill the interpreter and disable the session.
    pub fn logout_finish(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            match transport.try_wait() {
                Ok(Some(exit)) => debug!("Interpreter exited with code {:?}", exit.code),
                _ => {
                    warn!("{} did not exit in time, killing it", self.profile.program);
                    if let Err(err) = transport.kill() {
                        warn!("Failed to kill interpreter: {}", err);
                    }
                }
            }
        }
        self.settle_held();
        for id in std::mem::take(&mut self.queue) {
            self.finish(id, ExpressionStatus::Interrupted);
        }

        self.logging_out = false;
        self.framer.reset();
        self.clear_input_state();
        self.set_status(SessionStatus::Disabled);
    }

    fn accept_segments(&mut self, line: &str) {
        for segment in self.framer.split_line(line) {
            self.accept_line(segment);
        }
    }

    fn accept_line(&mut self, line: &str) {
        if let Some(echo) = self.echo.as_mut() {
            if echo.is_echo(line) {
                trace!("Dropping echo: {:?}", line);
                return;
            }
        }

        let Some(event) = self.framer.accept_line(line) else {
            return;
        };
        match event {
            FrameEvent::Completed(output) => self.finish_head(Outcome::Completed(output)),
            FrameEvent::Failed(output) => self.finish_head(Outcome::Failed(output)),
            FrameEvent::SyntaxError => self.finish_head(Outcome::SyntaxError),
            FrameEvent::Continuation { force_close } => {
                debug!("Interpreter waits for more input, closing the statement");
                if let Err(err) = self.write(&force_close) {
                    self.fail_session(err);
                }
            }
            FrameEvent::Resynced => {
                if self.status == SessionStatus::LoginStarted {
                    self.login_complete();
                } else {
                    self.run_first_expression();
                }
            }
            FrameEvent::Stray(text) => {
                if !text.is_empty() {
                    debug!("Discarding output outside any expression: {:?}", text);
                }
            }
        }
    }

    fn finish_head(&mut self, outcome: Outcome) {
        let Some(id) = self.queue.pop_front() else {
            warn!("Boundary without a pending expression");
            return;
        };

        if let Outcome::Failed(output) = &outcome {
            let silent = self
                .table
                .get(id)
                .is_some_and(|record| record.stderr().trim().is_empty());
            if silent {
                debug!("Expression {} failed silently, waiting for its error text", id);
                self.table.with(id, |record| record.append_stdout(output));
                self.held = Some(id);
                return;
            }
        }

        self.resolve(id, outcome);
        self.run_first_expression();
    }

    /// Resolve a held failure without dispatching anything.
    fn settle_held(&mut self) -> bool {
        match self.held.take() {
            Some(id) => {
                self.resolve(id, Outcome::Failed(String::new()));
                true
            }
            None => false,
        }
    }

    /// Give a closed expression its final status and results.
    fn resolve(&mut self, id: ExpressionId, outcome: Outcome) {
        if let Some(record) = self.table.get_mut(id) {
            let stderr = record.stderr().trim_end().to_string();
            let command = record.command().to_string();

            let error = match outcome {
                Outcome::SyntaxError => Some(SYNTAX_ERROR_MESSAGE.to_string()),
                Outcome::Completed(output) => {
                    record.append_stdout(&output);
                    (!stderr.is_empty()).then_some(stderr)
                }
                Outcome::Failed(output) => {
                    record.append_stdout(&output);
                    let output = record.stdout().trim_end();
                    Some(if !stderr.is_empty() {
                        stderr
                    } else if !output.is_empty() {
                        output.to_string()
                    } else {
                        GENERIC_ERROR_MESSAGE.to_string()
                    })
                }
            };

            match error {
                Some(message) => {
                    debug!("Expression {} failed: {}", id, message);
                    record.set_error_message(message);
                    self.finish(id, ExpressionStatus::Error);
                }
                None => {
                    for result in build_results(&self.profile, &command, record.stdout()) {
                        record.add_result(result);
                    }
                    self.finish(id, ExpressionStatus::Done);
                }
            }
        }
    }

    fn finish(&mut self, id: ExpressionId, status: ExpressionStatus) {
        if let Some(snapshot) = self.table.set_status(id, status) {
            self.events.push(SessionEvent::ExpressionFinished(snapshot));
        }
    }

    fn fail_session(&mut self, err: Error) {
        error!("Session on {} failed: {}", self.profile.name, err);
        let message = err.to_string();
        self.settle_held();

        for (index, id) in std::mem::take(&mut self.queue).into_iter().enumerate() {
            let computing = self
                .table
                .get(id)
                .is_some_and(|record| record.status() == ExpressionStatus::Computing);
            if index == 0 && computing {
                self.table
                    .with(id, |record| record.set_error_message(message.as_str()));
                self.finish(id, ExpressionStatus::Error);
            } else {
                self.finish(id, ExpressionStatus::Interrupted);
            }
        }

        if let Some(mut transport) = self.transport.take() {
            if let Err(err) = transport.kill() {
                warn!("Failed to kill interpreter: {}", err);
            }
        }
        self.logging_out = false;
        self.framer.reset();
        self.clear_input_state();
        self.set_status(SessionStatus::Disabled);
        self.events.push(SessionEvent::Error(message));
        self.failure = Some(err);
    }

    fn write(&mut self, input: &str) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(Error::SessionDisabled)?;
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.record(Stream::Input, input.as_bytes());
        }
        if let Some(echo) = self.echo.as_mut() {
            echo.expect(input);
        }
        debug!("Writing to {}: {:?}", self.profile.name, input);
        transport.write(input.as_bytes())
    }

    fn can_dispatch(&self) -> bool {
        self.transport.is_some()
            && !self.logging_out
            && matches!(self.status, SessionStatus::Done | SessionStatus::Running)
            && self.held.is_none()
            && !self.framer.in_flight()
            && !self.framer.is_resyncing()
    }

    fn computing_head(&self) -> Option<ExpressionId> {
        self.queue.front().copied().filter(|id| {
            self.table
                .get(*id)
                .is_some_and(|record| record.status() == ExpressionStatus::Computing)
        })
    }

    fn is_noop(&self, command: &str) -> bool {
        let command = command.trim();
        command.is_empty() || self.noop.as_ref().is_some_and(|re| re.is_match(command))
    }

    fn clear_input_state(&mut self) {
        self.stdout.clear();
        if let Some(echo) = self.echo.as_mut() {
            echo.clear();
        }
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status != status {
            debug!("Session status {:?} -> {:?}", self.status, status);
            self.status = status;
            self.events.push(SessionEvent::StatusChanged(status));
        }
    }
}

/// Turn the output of a successful command into results.
///
/// Leading empty lines and trailing newlines are dropped; whitespace the
/// interpreter printed otherwise stays. Lines starting with the profile's
/// image marker name image files.
fn build_results(profile: &BackendProfile, command: &str, output: &str) -> Vec<ExpressionResult> {
    let mut text = String::new();
    let mut images = Vec::new();

    for line in output.lines().skip_while(|line| line.is_empty()) {
        match profile
            .image_marker
            .as_deref()
            .and_then(|marker| line.strip_prefix(marker))
        {
            Some(path) => images.push(PathBuf::from(path.trim())),
            None => {
                text.push_str(line);
                text.push('\n');
            }
        }
    }

    let mut results = Vec::new();
    let text = text.trim_end_matches('\n');
    if !text.is_empty() {
        results.push(if profile.is_help_command(command) {
            ExpressionResult::Help(text.to_string())
        } else {
            ExpressionResult::Text(text.to_string())
        });
    }
    if !images.is_empty() {
        results.push(ExpressionResult::Images(images));
    }
    results
}
