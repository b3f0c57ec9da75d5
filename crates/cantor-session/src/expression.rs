//! Expression records and the handles given out to callers.

use std::time::Duration;

use cantor_core::{
    Error, ExpressionId, ExpressionResult, ExpressionSnapshot, ExpressionStatus,
    FinishingBehavior, Result,
};
use tokio::sync::watch;
use tracing::warn;

/// Session-side state of one submitted command.
///
/// Every change is published to the record's [`ExpressionHandle`]s. Once the
/// status is terminal, output, results and the error message are frozen.
#[derive(Debug)]
pub struct ExpressionRecord {
    id: ExpressionId,
    command: String,
    internal_command: String,
    status: ExpressionStatus,
    stdout: String,
    stderr: String,
    results: Vec<ExpressionResult>,
    error_message: Option<String>,
    internal: bool,
    finishing_behavior: FinishingBehavior,
    publisher: watch::Sender<ExpressionSnapshot>,
}

impl ExpressionRecord {
    /// Create a queued expression and its first handle.
    pub fn new(
        id: ExpressionId,
        command: impl Into<String>,
        finishing_behavior: FinishingBehavior,
        internal: bool,
    ) -> (Self, ExpressionHandle) {
        let command = command.into();
        let snapshot = ExpressionSnapshot {
            id,
            command: command.clone(),
            internal_command: command.clone(),
            status: ExpressionStatus::Queued,
            results: Vec::new(),
            error_message: None,
            internal,
            finishing_behavior,
        };
        let (publisher, receiver) = watch::channel(snapshot);

        let record = Self {
            id,
            internal_command: command.clone(),
            command,
            status: ExpressionStatus::Queued,
            stdout: String::new(),
            stderr: String::new(),
            results: Vec::new(),
            error_message: None,
            internal,
            finishing_behavior,
            publisher,
        };
        let handle = ExpressionHandle { id, receiver };
        (record, handle)
    }

    /// Expression id.
    pub fn id(&self) -> ExpressionId {
        self.id
    }

    /// Command as submitted.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Command as written to the interpreter.
    pub fn internal_command(&self) -> &str {
        &self.internal_command
    }

    /// Current status.
    pub fn status(&self) -> ExpressionStatus {
        self.status
    }

    /// Whether the expression was submitted by the session itself.
    pub fn is_internal(&self) -> bool {
        self.internal
    }

    /// Finishing behavior.
    pub fn finishing_behavior(&self) -> FinishingBehavior {
        self.finishing_behavior
    }

    /// Accumulated standard output.
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Accumulated standard error.
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Record the text actually written for this expression.
    pub fn set_internal_command(&mut self, internal_command: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.internal_command = internal_command.into();
        self.publish();
    }

    /// Append standard output; ignored once terminal.
    pub fn append_stdout(&mut self, text: &str) {
        if !self.status.is_terminal() {
            self.stdout.push_str(text);
        }
    }

    /// Append standard error; ignored once terminal.
    pub fn append_stderr(&mut self, text: &str) {
        if !self.status.is_terminal() {
            self.stderr.push_str(text);
        }
    }

    /// Add a result; ignored once terminal.
    pub fn add_result(&mut self, result: ExpressionResult) {
        if self.status.is_terminal() {
            return;
        }
        self.results.push(result);
        self.publish();
    }

    /// Set the error message; ignored once terminal.
    pub fn set_error_message(&mut self, message: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.error_message = Some(message.into());
        self.publish();
    }

    /// Move to `next`, returning whether the transition was legal.
    pub fn set_status(&mut self, next: ExpressionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(
                "Ignoring expression {} transition {} -> {}",
                self.id, self.status, next
            );
            return false;
        }
        self.status = next;
        self.publish();
        true
    }

    /// Current state as seen by handles.
    pub fn snapshot(&self) -> ExpressionSnapshot {
        ExpressionSnapshot {
            id: self.id,
            command: self.command.clone(),
            internal_command: self.internal_command.clone(),
            status: self.status,
            results: self.results.clone(),
            error_message: self.error_message.clone(),
            internal: self.internal,
            finishing_behavior: self.finishing_behavior,
        }
    }

    /// Another handle to this expression.
    pub fn handle(&self) -> ExpressionHandle {
        ExpressionHandle {
            id: self.id,
            receiver: self.publisher.subscribe(),
        }
    }

    fn publish(&self) {
        // Handles may all be gone; the record stays authoritative.
        self.publisher.send_replace(self.snapshot());
    }
}

/// Caller-side view of an expression.
///
/// Handles stay valid after the session forgets the expression: they keep
/// the last published snapshot.
#[derive(Debug, Clone)]
pub struct ExpressionHandle {
    id: ExpressionId,
    receiver: watch::Receiver<ExpressionSnapshot>,
}

impl ExpressionHandle {
    /// Expression id.
    pub fn id(&self) -> ExpressionId {
        self.id
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> ExpressionSnapshot {
        self.receiver.borrow().clone()
    }

    /// Latest status.
    pub fn status(&self) -> ExpressionStatus {
        self.receiver.borrow().status
    }

    /// Wait until the expression reaches a terminal status.
    pub async fn wait_finished(&self, timeout: Duration) -> Result<ExpressionSnapshot> {
        let mut receiver = self.receiver.clone();
        let waited = tokio::time::timeout(timeout, async {
            match receiver.wait_for(|s| s.status.is_terminal()).await {
                Ok(snapshot) => Ok(snapshot.clone()),
                Err(_) => Err(Error::SessionClosed),
            }
        })
        .await;

        match waited {
            Ok(result) => result,
            Err(_) => Err(Error::WaitTimeout(timeout.as_millis() as u64)),
        }
    }
}
