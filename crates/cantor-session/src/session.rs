//! Interpreter sessions.
//!
//! A [`Session`] is a cloneable handle to a tokio task that owns a
//! [`SessionEngine`]. The task multiplexes caller requests and transport
//! output onto the engine, so every engine call happens on one task and the
//! interpreter's stdin has a single writer.

use std::sync::Arc;
use std::time::Duration;

use cantor_core::{
    BackendProfile, Error, ExpressionId, ExpressionSnapshot, FinishingBehavior, Result, SessionId,
    SessionInfo, SessionSettings, SessionStatus,
};
use cantor_transport::{
    default_factory, EventReceiver, LaunchSpec, TransportEvent, TransportFactory,
};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::SessionEngine;
use crate::expression::ExpressionHandle;

/// Capacity of the session event channel.
const EVENT_CAPACITY: usize = 256;

/// How often the interpreter is polled while it shuts down.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Something that happened in a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session status changed
    StatusChanged(SessionStatus),
    /// The interpreter presented its first boundary
    LoginDone,
    /// The session failed and is disabled
    Error(String),
    /// An expression reached a terminal status
    ExpressionFinished(ExpressionSnapshot),
}

/// Requests handled by the session task.
enum Command {
    Login {
        reply: oneshot::Sender<Result<()>>,
    },
    Logout {
        reply: oneshot::Sender<()>,
    },
    Evaluate {
        command: String,
        finishing_behavior: FinishingBehavior,
        internal: bool,
        reply: oneshot::Sender<Result<ExpressionHandle>>,
    },
    Interrupt {
        reply: oneshot::Sender<()>,
    },
    Expression {
        id: ExpressionId,
        reply: oneshot::Sender<Option<ExpressionHandle>>,
    },
    Pending {
        reply: oneshot::Sender<usize>,
    },
}

#[derive(Debug)]
struct Inner {
    id: SessionId,
    profile: BackendProfile,
    settings: SessionSettings,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SessionEvent>,
    status: watch::Receiver<SessionStatus>,
}

/// Handle to an interpreter session.
///
/// Dropping the last handle logs the session out.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Start a session task that spawns real interpreter processes.
    pub fn spawn(profile: BackendProfile, settings: SessionSettings) -> Result<Self> {
        Self::with_factory(profile, settings, default_factory())
    }

    /// Start a session task attaching through `factory`.
    ///
    /// Must be called from within a tokio runtime. The interpreter is not
    /// started until [`Session::login`].
    pub fn with_factory(
        profile: BackendProfile,
        settings: SessionSettings,
        factory: TransportFactory,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Other(format!("sessions need a tokio runtime: {e}")))?;
        let engine =
            SessionEngine::new(profile.clone())?.with_retention(settings.expression_retention);

        let id = SessionId::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (status_tx, status_rx) = watch::channel(SessionStatus::Disabled);

        let actor = SessionActor {
            id,
            engine,
            factory,
            settings: settings.clone(),
            commands: commands_rx,
            events: events_tx.clone(),
            status: status_tx,
            transport_events: None,
            pending_login: None,
        };
        runtime.spawn(actor.run());

        info!("Created session {} for backend '{}'", id, profile.name);
        Ok(Self {
            inner: Arc::new(Inner {
                id,
                profile,
                settings,
                commands: commands_tx,
                events: events_tx,
                status: status_rx,
            }),
        })
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Backend profile.
    pub fn profile(&self) -> &BackendProfile {
        &self.inner.profile
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Start the interpreter and wait for its first boundary.
    ///
    /// Fails with [`Error::LoginTimeout`] if the boundary does not appear
    /// within the configured login timeout; the interpreter is then shut
    /// down.
    pub async fn login(&self) -> Result<()> {
        let timeout = self.inner.settings.login_timeout();
        let (reply, response) = oneshot::channel();
        self.send(Command::Login { reply })?;

        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::SessionClosed),
            Err(_) => {
                warn!(
                    "Login to '{}' timed out after {:?}",
                    self.inner.profile.name, timeout
                );
                self.logout().await?;
                Err(Error::LoginTimeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Stop the interpreter: exit command, grace period, then kill.
    ///
    /// Logging out a disabled session does nothing.
    pub async fn logout(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Logout { reply })?;
        response.await.map_err(|_| Error::SessionClosed)
    }

    /// Queue `command` for evaluation without waiting for its result.
    pub async fn evaluate_expression(
        &self,
        command: impl Into<String>,
        finishing_behavior: FinishingBehavior,
        internal: bool,
    ) -> Result<ExpressionHandle> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Evaluate {
            command: command.into(),
            finishing_behavior,
            internal,
            reply,
        })?;
        response.await.map_err(|_| Error::SessionClosed)?
    }

    /// Interrupt the running expression and drop the queue.
    pub async fn interrupt(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Interrupt { reply })?;
        response.await.map_err(|_| Error::SessionClosed)
    }

    /// Handle to an expression the session still tracks.
    pub async fn expression(&self, id: ExpressionId) -> Result<ExpressionHandle> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Expression { id, reply })?;
        response
            .await
            .map_err(|_| Error::SessionClosed)?
            .ok_or(Error::ExpressionNotFound(id))
    }

    /// Summary for listings.
    pub async fn info(&self) -> SessionInfo {
        let (reply, response) = oneshot::channel();
        let pending = match self.send(Command::Pending { reply }) {
            Ok(()) => response.await.unwrap_or(0),
            Err(_) => 0,
        };
        SessionInfo::new(self.id(), &self.inner.profile.name, self.status(), pending)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| Error::SessionClosed)
    }
}

/// The task behind a [`Session`].
struct SessionActor {
    id: SessionId,
    engine: SessionEngine,
    factory: TransportFactory,
    settings: SessionSettings,
    commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<SessionEvent>,
    status: watch::Sender<SessionStatus>,
    transport_events: Option<EventReceiver>,
    pending_login: Option<oneshot::Sender<Result<()>>>,
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("Every handle to session {} dropped", self.id);
                        self.logout().await;
                        break;
                    }
                },
                event = next_event(&mut self.transport_events) => self.handle_event(event),
                // Restarts on every other wakeup, so late error text gets a quiet period
                _ = tokio::time::sleep(self.settings.stderr_grace()), if self.engine.has_held_failure() => {
                    debug!("No error text arrived, releasing the failed expression");
                    self.engine.release_held_failure();
                }
            }
            self.publish();
        }
        debug!("Session {} task finished", self.id);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Login { reply } => self.login(reply),
            Command::Logout { reply } => {
                self.logout().await;
                let _ = reply.send(());
            }
            Command::Evaluate {
                command,
                finishing_behavior,
                internal,
                reply,
            } => {
                let result = self.engine.enqueue(&command, finishing_behavior, internal);
                let _ = reply.send(result);
            }
            Command::Interrupt { reply } => {
                self.engine.interrupt();
                let _ = reply.send(());
            }
            Command::Expression { id, reply } => {
                let _ = reply.send(self.engine.handle(id));
            }
            Command::Pending { reply } => {
                let _ = reply.send(self.engine.pending());
            }
        }
    }

    fn login(&mut self, reply: oneshot::Sender<Result<()>>) {
        match self.engine.status() {
            SessionStatus::Disabled => {}
            SessionStatus::LoginStarted => {
                let _ = reply.send(Err(Error::InvalidInput(
                    "login already in progress".to_string(),
                )));
                return;
            }
            SessionStatus::Done | SessionStatus::Running => {
                let _ = reply.send(Ok(()));
                return;
            }
        }

        let profile = self.engine.profile();
        let spec = LaunchSpec::from(profile);
        let (transport, events) = match (self.factory)(profile.transport, &spec) {
            Ok(spawned) => spawned,
            Err(err) => {
                warn!("Failed to start '{}': {}", spec.program, err);
                let _ = self.events.send(SessionEvent::Error(err.to_string()));
                let _ = reply.send(Err(err));
                return;
            }
        };

        self.transport_events = Some(events);
        if self.settings.record_transcript {
            self.engine.start_transcript();
        }
        self.pending_login = Some(reply);
        self.engine.login_started(transport);
    }

    async fn logout(&mut self) {
        if self.engine.logout_begin() {
            self.publish();

            let deadline = Instant::now() + self.settings.logout_grace();
            while !self.engine.has_exited() && Instant::now() < deadline {
                // Keep draining output so the transcript sees the goodbye.
                if let Ok(event) =
                    tokio::time::timeout(EXIT_POLL_INTERVAL, next_event(&mut self.transport_events))
                        .await
                {
                    self.handle_event(event);
                }
            }
            self.engine.logout_finish();
        }

        self.transport_events = None;
        if let Some(reply) = self.pending_login.take() {
            let _ = reply.send(Err(Error::SessionDisabled));
        }
        self.save_transcript();
    }

    fn handle_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Stdout(bytes)) => self.engine.on_stdout(&bytes),
            Some(TransportEvent::Stderr(bytes)) => self.engine.on_stderr(&bytes),
            Some(TransportEvent::Closed) => self.engine.on_closed(),
            None => {
                self.transport_events = None;
                self.engine.on_closed();
            }
        }
    }

    /// Broadcast engine events and answer a pending login.
    fn publish(&mut self) {
        self.status.send_replace(self.engine.status());

        for event in self.engine.take_events() {
            if event == SessionEvent::LoginDone {
                if let Some(reply) = self.pending_login.take() {
                    let _ = reply.send(Ok(()));
                }
            }
            // No subscribers is fine.
            let _ = self.events.send(event);
        }

        if let Some(failure) = self.engine.take_failure() {
            if let Some(reply) = self.pending_login.take() {
                let _ = reply.send(Err(failure));
            }
            self.transport_events = None;
        }
    }

    fn save_transcript(&mut self) {
        let Some(transcript) = self.engine.take_transcript() else {
            return;
        };
        let path = self
            .settings
            .transcript_dir()
            .join(format!("cantor-{}.jsonl", self.id));
        match transcript.save_to_file(&path) {
            Ok(()) => info!("Saved transcript to {}", path.display()),
            Err(err) => warn!("Failed to save transcript to {}: {}", path.display(), err),
        }
    }
}

/// Next transport event; pends forever when no transport is attached.
async fn next_event(events: &mut Option<EventReceiver>) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
