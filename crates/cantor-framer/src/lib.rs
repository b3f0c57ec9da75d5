//! # cantor-framer
//!
//! Output framers for the Cantor REPL bridge.
//!
//! A framer sits between the interpreter's output lines and the expression
//! queue. It decides where the output of one command ends:
//! - [`PromptFramer`] waits for a custom prompt carrying a sequence number
//! - [`SentinelFramer`] brackets every command with marker-printing statements
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on cantor-core only and
//! performs no I/O; the session layer feeds it lines and writes what it asks.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod framer;
pub mod prompt;
pub mod sentinel;

// Re-export commonly used types
pub use framer::{build_framer, FrameEvent, Framer, SYNTAX_ERROR_MESSAGE};
pub use prompt::PromptFramer;
pub use sentinel::SentinelFramer;
