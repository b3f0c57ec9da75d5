//! The transport abstraction shared by every process attachment.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use cantor_core::{BackendProfile, Error, Result, TransportKind};
use tokio::sync::mpsc;

use crate::pipe::PipeTransport;
use crate::pty::PtyTransport;

/// Something the interpreter process did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes read from standard output (or the merged terminal stream)
    Stdout(Vec<u8>),
    /// Bytes read from standard error
    Stderr(Vec<u8>),
    /// The output stream reached end of file
    Closed,
}

/// Sending half of a transport's event channel.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of a transport's event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// How a reaped process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code; `None` when the process was killed by a signal
    pub code: Option<i32>,
}

/// Command line of an interpreter process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// Working directory
    pub working_directory: Option<PathBuf>,
}

impl LaunchSpec {
    /// Launch spec for `program` without arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Add arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl From<&BackendProfile> for LaunchSpec {
    fn from(profile: &BackendProfile) -> Self {
        Self {
            program: profile.program.clone(),
            args: profile.args.clone(),
            env: profile.env.clone(),
            working_directory: profile.working_directory.clone(),
        }
    }
}

/// A live attachment to an interpreter process.
///
/// Output does not go through this trait; it arrives on the [`EventReceiver`]
/// returned together with the transport.
pub trait Transport: Send + std::fmt::Debug {
    /// Write input to the interpreter.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Deliver an interrupt (SIGINT) to the interpreter.
    fn interrupt(&mut self) -> Result<()>;

    /// Reap the process if it has exited, without blocking.
    fn try_wait(&mut self) -> Result<Option<ProcessExit>>;

    /// Kill the process.
    fn kill(&mut self) -> Result<()>;

    /// Process id, while known.
    fn pid(&self) -> Option<u32>;
}

/// Constructor used by sessions to attach to an interpreter.
pub type TransportFactory = Arc<
    dyn Fn(TransportKind, &LaunchSpec) -> Result<(Box<dyn Transport>, EventReceiver)>
        + Send
        + Sync,
>;

/// Spawn the interpreter with the requested transport.
pub fn spawn_transport(
    kind: TransportKind,
    spec: &LaunchSpec,
) -> Result<(Box<dyn Transport>, EventReceiver)> {
    match kind {
        TransportKind::Pipe => {
            let (transport, events) = PipeTransport::spawn(spec)?;
            Ok((Box::new(transport) as Box<dyn Transport>, events))
        }
        TransportKind::Pty => {
            let (transport, events) = PtyTransport::spawn(spec)?;
            Ok((Box::new(transport) as Box<dyn Transport>, events))
        }
    }
}

/// Factory spawning real processes.
pub fn default_factory() -> TransportFactory {
    Arc::new(spawn_transport)
}

/// Send SIGINT to `pid`.
#[cfg(unix)]
pub(crate) fn send_interrupt(pid: Option<u32>) -> Result<()> {
    let pid = pid.ok_or_else(|| Error::Transport("process id unknown".to_string()))?;
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| Error::Transport(format!("process id out of range: {pid}")))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let result = unsafe { libc::kill(pid, libc::SIGINT) };
    if result == -1 {
        return Err(Error::Transport(format!(
            "failed to interrupt process {pid}: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Send SIGINT to `pid`.
#[cfg(not(unix))]
pub(crate) fn send_interrupt(_pid: Option<u32>) -> Result<()> {
    Err(Error::Transport(
        "interrupting the interpreter is not supported on this platform".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_spec_from_profile() {
        let mut profile = BackendProfile::octave();
        profile
            .env
            .insert("LC_ALL".to_string(), "C".to_string());
        let spec = LaunchSpec::from(&profile);
        assert_eq!(spec.program, "octave-cli");
        assert_eq!(spec.args[0], "--silent");
        assert_eq!(spec.env.get("LC_ALL").map(String::as_str), Some("C"));
    }

    #[test]
    fn test_launch_spec_builder() {
        let spec = LaunchSpec::new("/bin/sh").args(["-c", "true"]);
        assert_eq!(spec.args, vec!["-c".to_string(), "true".to_string()]);
        assert!(spec.working_directory.is_none());
    }

    #[test]
    fn test_spawn_missing_program_fails() {
        let spec = LaunchSpec::new("/nonexistent/cantor-interpreter");
        let err = spawn_transport(TransportKind::Pipe, &spec).unwrap_err();
        assert!(matches!(err, Error::SpawnFailed(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_interrupt_without_pid() {
        assert!(matches!(send_interrupt(None), Err(Error::Transport(_))));
    }
}
