//! # cantor-transport
//!
//! Process transports for the Cantor REPL bridge.
//!
//! This crate provides:
//! - The [`Transport`] trait: write input, signal, reap and kill the interpreter
//! - Pipe transport (separate stdout and stderr) built on `std::process`
//! - PTY transport built on `portable-pty`, with ANSI sequences stripped via `vte`
//! - Line assembly for partial reads and echo filtering for terminals
//! - A scripted in-memory transport for tests
//!
//! Output is never pulled: every transport pushes [`TransportEvent`]s into an
//! unbounded tokio channel from its own reader threads, so the session task
//! only ever waits on a channel.
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on cantor-core only.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ansi;
pub mod lines;
pub mod pipe;
pub mod pty;
pub mod testing;
pub mod transport;

// Re-export commonly used types
pub use ansi::AnsiStripper;
pub use lines::{EchoFilter, LineAssembler};
pub use pipe::PipeTransport;
pub use pty::PtyTransport;
pub use transport::{
    default_factory, spawn_transport, EventReceiver, EventSender, LaunchSpec, ProcessExit,
    Transport, TransportEvent, TransportFactory,
};
