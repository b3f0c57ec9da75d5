//! In-memory transport for tests.
//!
//! [`ScriptedTransport`] stands in for an interpreter process. The paired
//! [`ScriptedPeer`] plays the interpreter: it pushes output events and
//! inspects what the session wrote, how often it was interrupted and whether
//! it was killed.

use std::sync::{Arc, Mutex, MutexGuard};

use cantor_core::{Error, Result, TransportKind};
use tokio::sync::mpsc;

use crate::transport::{
    EventReceiver, EventSender, LaunchSpec, ProcessExit, Transport, TransportEvent,
    TransportFactory,
};

#[derive(Debug, Default)]
struct Shared {
    written: Vec<u8>,
    interrupts: usize,
    kills: usize,
    exit: Option<ProcessExit>,
    exit_on_input: Option<String>,
    fail_writes: bool,
}

/// Transport half, handed to the session.
#[derive(Debug)]
pub struct ScriptedTransport {
    shared: Arc<Mutex<Shared>>,
    events: EventSender,
}

/// Interpreter half, kept by the test.
#[derive(Debug, Clone)]
pub struct ScriptedPeer {
    shared: Arc<Mutex<Shared>>,
    events: EventSender,
    spec: LaunchSpec,
}

/// Create a connected transport/peer pair.
pub fn scripted(spec: LaunchSpec) -> (ScriptedTransport, ScriptedPeer, EventReceiver) {
    let shared = Arc::new(Mutex::new(Shared::default()));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ScriptedTransport {
            shared: Arc::clone(&shared),
            events: tx.clone(),
        },
        ScriptedPeer {
            shared,
            events: tx,
            spec,
        },
        rx,
    )
}

/// Factory creating a scripted pair per spawn; peers arrive on the receiver.
pub fn scripted_factory() -> (TransportFactory, mpsc::UnboundedReceiver<ScriptedPeer>) {
    let (peers_tx, peers_rx) = mpsc::unbounded_channel();
    let factory: TransportFactory = Arc::new(
        move |_kind: TransportKind,
              spec: &LaunchSpec|
              -> Result<(Box<dyn Transport>, EventReceiver)> {
            let (transport, peer, events) = scripted(spec.clone());
            peers_tx
                .send(peer)
                .map_err(|_| Error::SpawnFailed("test peer receiver dropped".to_string()))?;
            Ok((Box::new(transport) as Box<dyn Transport>, events))
        },
    );
    (factory, peers_rx)
}

/// Factory whose every spawn fails like a missing executable.
pub fn failing_factory() -> TransportFactory {
    Arc::new(
        |_kind: TransportKind, spec: &LaunchSpec| -> Result<(Box<dyn Transport>, EventReceiver)> {
            Err(Error::SpawnFailed(format!(
                "{}: No such file or directory",
                spec.program
            )))
        },
    )
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Transport for ScriptedTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut shared = lock(&self.shared);
        if shared.fail_writes || shared.exit.is_some() {
            return Err(Error::Transport("broken pipe".to_string()));
        }
        shared.written.extend_from_slice(data);

        let text = String::from_utf8_lossy(data);
        let exits = shared
            .exit_on_input
            .as_deref()
            .is_some_and(|trigger| text.contains(trigger));
        if exits {
            shared.exit = Some(ProcessExit { code: Some(0) });
            let _ = self.events.send(TransportEvent::Closed);
        }
        Ok(())
    }

    fn interrupt(&mut self) -> Result<()> {
        lock(&self.shared).interrupts += 1;
        Ok(())
    }

    fn try_wait(&mut self) -> Result<Option<ProcessExit>> {
        Ok(lock(&self.shared).exit)
    }

    fn kill(&mut self) -> Result<()> {
        let mut shared = lock(&self.shared);
        shared.kills += 1;
        if shared.exit.is_none() {
            shared.exit = Some(ProcessExit { code: None });
            let _ = self.events.send(TransportEvent::Closed);
        }
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}

impl ScriptedPeer {
    /// Launch spec the session asked for.
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Emit standard output.
    pub fn stdout(&self, text: &str) {
        let _ = self.events.send(TransportEvent::Stdout(text.as_bytes().to_vec()));
    }

    /// Emit standard error.
    pub fn stderr(&self, text: &str) {
        let _ = self.events.send(TransportEvent::Stderr(text.as_bytes().to_vec()));
    }

    /// Simulate the interpreter exiting on its own.
    pub fn exit(&self, code: Option<i32>) {
        lock(&self.shared).exit = Some(ProcessExit { code });
        let _ = self.events.send(TransportEvent::Closed);
    }

    /// Exit as soon as input containing `trigger` is written.
    pub fn exit_on_input(&self, trigger: &str) {
        lock(&self.shared).exit_on_input = Some(trigger.to_string());
    }

    /// Make every following write fail.
    pub fn fail_writes(&self) {
        lock(&self.shared).fail_writes = true;
    }

    /// Everything written so far.
    pub fn written(&self) -> String {
        String::from_utf8_lossy(&lock(&self.shared).written).into_owned()
    }

    /// Everything written since the last call.
    pub fn take_written(&self) -> String {
        let bytes = std::mem::take(&mut lock(&self.shared).written);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Number of interrupts delivered.
    pub fn interrupts(&self) -> usize {
        lock(&self.shared).interrupts
    }

    /// Number of kills.
    pub fn kills(&self) -> usize {
        lock(&self.shared).kills
    }

    /// Whether the simulated process has exited.
    pub fn has_exited(&self) -> bool {
        lock(&self.shared).exit.is_some()
    }
}
