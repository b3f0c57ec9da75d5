//! Pipe transport: stdin, stdout and stderr as separate channels.

use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;

use cantor_core::{Error, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::transport::{
    send_interrupt, EventReceiver, EventSender, LaunchSpec, ProcessExit, Transport,
    TransportEvent,
};

const READ_CHUNK: usize = 4096;

/// Which output stream a reader thread drains.
#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Interpreter attached through anonymous pipes.
#[derive(Debug)]
pub struct PipeTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    program: String,
}

impl PipeTransport {
    /// Spawn the interpreter and start one reader thread per output stream.
    ///
    /// `Closed` is sent when standard output reaches end of file.
    pub fn spawn(spec: &LaunchSpec) -> Result<(Self, EventReceiver)> {
        info!(
            "Spawning interpreter: program='{}' args={:?} cwd={:?}",
            spec.program, spec.args, spec.working_directory
        );

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.working_directory {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            error!("Failed to spawn '{}': {}", spec.program, e);
            Error::SpawnFailed(format!("{}: {e}", spec.program))
        })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::SpawnFailed("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::SpawnFailed("stderr not captured".to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_reader(stdout, Stream::Stdout, tx.clone())?;
        spawn_reader(stderr, Stream::Stderr, tx)?;

        info!("Interpreter spawned: pid={}", child.id());

        Ok((
            Self {
                child,
                stdin,
                program: spec.program.clone(),
            },
            rx,
        ))
    }
}

fn spawn_reader<R>(mut source: R, stream: Stream, tx: EventSender) -> Result<()>
where
    R: Read + Send + 'static,
{
    let name = match stream {
        Stream::Stdout => "cantor-stdout",
        Stream::Stderr => "cantor-stderr",
    };

    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut buffer = [0u8; READ_CHUNK];
            loop {
                match source.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = buffer[..n].to_vec();
                        let event = match stream {
                            Stream::Stdout => TransportEvent::Stdout(chunk),
                            Stream::Stderr => TransportEvent::Stderr(chunk),
                        };
                        if tx.send(event).is_err() {
                            return; // Receiver dropped
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("Read error on {:?}: {}", stream, e);
                        break;
                    }
                }
            }
            debug!("{:?} reached end of file", stream);
            if matches!(stream, Stream::Stdout) {
                let _ = tx.send(TransportEvent::Closed);
            }
        })
        .map(|_| ())
        .map_err(|e| Error::SpawnFailed(format!("failed to start reader thread: {e}")))
}

impl Transport for PipeTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        debug!("Writing {} bytes to {}", data.len(), self.program);
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Transport("stdin already closed".to_string()))?;
        stdin
            .write_all(data)
            .and_then(|_| stdin.flush())
            .map_err(|e| Error::Transport(format!("write to {} failed: {e}", self.program)))
    }

    fn interrupt(&mut self) -> Result<()> {
        debug!("Interrupting {} (pid {})", self.program, self.child.id());
        send_interrupt(Some(self.child.id()))
    }

    fn try_wait(&mut self) -> Result<Option<ProcessExit>> {
        let status = self.child.try_wait()?;
        Ok(status.map(|s| ProcessExit { code: s.code() }))
    }

    fn kill(&mut self) -> Result<()> {
        info!("Killing {} (pid {})", self.program, self.child.id());
        self.stdin = None;
        match self.child.kill() {
            Ok(()) => {}
            // Already exited
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(Error::Transport(format!("kill failed: {e}"))),
        }
        self.child.wait()?;
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }
}

impl Drop for PipeTransport {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!("Interpreter {} still running on drop, killing", self.program);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next_stdout(rx: &mut EventReceiver) -> Vec<u8> {
        let mut collected = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await
        {
            if let TransportEvent::Stdout(bytes) = event {
                collected.extend(bytes);
                if collected.ends_with(b"\n") {
                    break;
                }
            }
        }
        collected
    }

    #[tokio::test]
    async fn test_pipe_echo_roundtrip() {
        let (mut transport, mut rx) = PipeTransport::spawn(&LaunchSpec::new("cat")).unwrap();
        assert!(transport.pid().is_some());

        transport.write(b"hello\n").unwrap();
        assert_eq!(next_stdout(&mut rx).await, b"hello\n");

        transport.kill().unwrap();
        assert!(transport.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pipe_separates_stderr() {
        let spec = LaunchSpec::new("/bin/sh").args(["-c", "echo out; echo err >&2"]);
        let (_transport, mut rx) = PipeTransport::spawn(&spec).unwrap();

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut closed = false;
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await
        {
            match event {
                TransportEvent::Stdout(b) => stdout.extend(b),
                TransportEvent::Stderr(b) => stderr.extend(b),
                TransportEvent::Closed => closed = true,
            }
        }
        assert_eq!(stdout, b"out\n");
        assert_eq!(stderr, b"err\n");
        assert!(closed);
    }

    #[tokio::test]
    async fn test_pipe_reports_exit_code() {
        let spec = LaunchSpec::new("/bin/sh").args(["-c", "exit 3"]);
        let (mut transport, mut rx) = PipeTransport::spawn(&spec).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(TransportEvent::Closed));

        let mut exit = None;
        for _ in 0..50 {
            exit = transport.try_wait().unwrap();
            if exit.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(exit, Some(ProcessExit { code: Some(3) }));
    }

    #[tokio::test]
    async fn test_pipe_interrupt() {
        let spec = LaunchSpec::new("sleep").args(["5"]);
        let (mut transport, _rx) = PipeTransport::spawn(&spec).unwrap();
        transport.interrupt().unwrap();

        let mut exit = None;
        for _ in 0..100 {
            exit = transport.try_wait().unwrap();
            if exit.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let exit = exit.expect("process should exit on SIGINT");
        assert_eq!(exit.code, None);
    }

    #[test]
    fn test_write_after_kill_fails() {
        let (mut transport, _rx) = PipeTransport::spawn(&LaunchSpec::new("cat")).unwrap();
        transport.kill().unwrap();
        assert!(matches!(transport.write(b"x\n"), Err(Error::Transport(_))));
    }
}
