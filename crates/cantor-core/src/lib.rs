//! # cantor-core
//!
//! Core types for the Cantor REPL bridge.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other cantor crates. It provides:
//!
//! - Session types (SessionId, SessionStatus, SessionInfo)
//! - Expression types (ExpressionId, ExpressionStatus, results, snapshots)
//! - Backend profiles describing how to launch and frame an interpreter
//! - Capability and extension registry
//! - Configuration loading
//! - Error types
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other cantor crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod error;
pub mod expression;
pub mod extension;
pub mod session;

// Re-export commonly used types
pub use backend::{BackendProfile, Capability, FramingConfig, TransportKind};
pub use config::{AppConfig, ServerSettings, SessionSettings};
pub use error::{Error, Result};
pub use expression::{
    ExpressionId, ExpressionResult, ExpressionSnapshot, ExpressionStatus, FinishingBehavior,
};
pub use extension::{
    Extension, ExtensionKind, ExtensionSet, HistoryExtension, ScriptExtension,
    VariableManagementExtension,
};
pub use session::{SessionId, SessionInfo, SessionStatus};
