//! PTY transport built on portable-pty.
//!
//! Some interpreters only print prompts when attached to a terminal. The
//! terminal merges standard output and standard error into one stream, so
//! every byte is reported as `Stdout`, after ANSI sequences are stripped.

use std::io::{Read, Write};
use std::thread;

use cantor_core::{Error, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::ansi::AnsiStripper;
use crate::transport::{
    send_interrupt, EventReceiver, LaunchSpec, ProcessExit, Transport, TransportEvent,
};

const READ_CHUNK: usize = 4096;

/// Wide enough that interpreters do not wrap result lines.
const PTY_SIZE: PtySize = PtySize {
    rows: 24,
    cols: 512,
    pixel_width: 0,
    pixel_height: 0,
};

/// Interpreter attached through a pseudo-terminal.
pub struct PtyTransport {
    /// Kept alive for the lifetime of the child; dropping it hangs the child up
    _master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    program: String,
}

impl std::fmt::Debug for PtyTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyTransport")
            .field("program", &self.program)
            .field("pid", &self.child.process_id())
            .finish_non_exhaustive()
    }
}

impl PtyTransport {
    /// Spawn the interpreter on a fresh PTY and start the reader thread.
    pub fn spawn(spec: &LaunchSpec) -> Result<(Self, EventReceiver)> {
        info!(
            "Spawning PTY interpreter: program='{}' args={:?} cwd={:?}",
            spec.program, spec.args, spec.working_directory
        );

        let pair = native_pty_system().openpty(PTY_SIZE).map_err(|e| {
            error!("Failed to open PTY: {}", e);
            Error::SpawnFailed(format!("failed to open PTY: {e}"))
        })?;

        let mut cmd = CommandBuilder::new(&spec.program);
        for arg in &spec.args {
            cmd.arg(arg);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.working_directory {
            debug!("Setting working directory to: {}", dir.display());
            cmd.cwd(dir);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn '{}': {}", spec.program, e);
            Error::SpawnFailed(format!("{}: {e}", spec.program))
        })?;
        // Only the child holds the slave end now, so EOF follows its exit.
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::SpawnFailed(format!("failed to take PTY writer: {e}")))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::SpawnFailed(format!("failed to clone PTY reader: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        thread::Builder::new()
            .name("cantor-pty".to_string())
            .spawn(move || read_loop(reader, tx))
            .map_err(|e| Error::SpawnFailed(format!("failed to start reader thread: {e}")))?;

        info!(
            "PTY interpreter spawned: program='{}' pid={:?}",
            spec.program,
            child.process_id()
        );

        Ok((
            Self {
                _master: pair.master,
                child,
                writer,
                program: spec.program.clone(),
            },
            rx,
        ))
    }
}

fn read_loop(mut reader: Box<dyn Read + Send>, tx: mpsc::UnboundedSender<TransportEvent>) {
    let mut stripper = AnsiStripper::new();
    let mut buffer = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                let text = stripper.strip(&buffer[..n]);
                if text.is_empty() {
                    continue;
                }
                if tx.send(TransportEvent::Stdout(text)).is_err() {
                    return; // Receiver dropped
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Linux reports EIO on the master once the slave side is gone
                debug!("PTY read ended: {}", e);
                break;
            }
        }
    }
    let _ = tx.send(TransportEvent::Closed);
}

impl Transport for PtyTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        debug!("Writing {} bytes to PTY", data.len());
        self.writer
            .write_all(data)
            .and_then(|_| self.writer.flush())
            .map_err(|e| Error::Transport(format!("write to {} failed: {e}", self.program)))
    }

    fn interrupt(&mut self) -> Result<()> {
        send_interrupt(self.child.process_id())
    }

    fn try_wait(&mut self) -> Result<Option<ProcessExit>> {
        let status = self.child.try_wait()?;
        Ok(status.map(|s| ProcessExit {
            code: i32::try_from(s.exit_code()).ok(),
        }))
    }

    fn kill(&mut self) -> Result<()> {
        info!("Killing PTY interpreter {}", self.program);
        if let Err(e) = self.child.kill() {
            if self.child.try_wait()?.is_none() {
                return Err(Error::Transport(format!("kill failed: {e}")));
            }
        }
        self.child
            .wait()
            .map(|_| ())
            .map_err(|e| Error::Transport(format!("wait failed: {e}")))
    }

    fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }
}

impl Drop for PtyTransport {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!("PTY interpreter {} still running on drop, killing", self.program);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
