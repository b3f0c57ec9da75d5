//! # cantor-session
//!
//! Session lifecycle management for the Cantor REPL bridge.
//!
//! This crate provides:
//! - The expression state machine and the handles given to callers
//! - The session engine: queue, dispatch, framing and crash handling
//! - Session tasks with login, logout and interrupt
//! - Session registry management
//! - Protocol transcripts
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture - it depends on cantor-core,
//! cantor-transport and cantor-framer to drive interpreter processes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod expression;
pub mod manager;
pub mod session;
pub mod table;
pub mod transcript;

// Re-export commonly used types
pub use engine::SessionEngine;
pub use expression::{ExpressionHandle, ExpressionRecord};
pub use manager::{SessionManager, SessionManagerConfig};
pub use session::{Session, SessionEvent};
pub use table::ExpressionTable;
pub use transcript::{Stream, Transcript, TranscriptEntry, TranscriptHeader};
