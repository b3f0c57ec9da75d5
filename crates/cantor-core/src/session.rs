//! Session identity and status types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an interpreter session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Status of an interpreter session.
///
/// `Disabled` is both the initial state and the state after logout or a
/// crash of the interpreter. `Done` means idle and logged in.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum SessionStatus {
    /// The interpreter is being started
    LoginStarted,
    /// Logged in and idle
    Done,
    /// An expression is being computed
    Running,
    /// No interpreter attached
    #[default]
    Disabled,
}

impl SessionStatus {
    /// Whether expressions can be submitted in this state.
    pub fn accepts_expressions(&self) -> bool {
        matches!(self, SessionStatus::Done | SessionStatus::Running)
    }
}

/// Information about a registered session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionInfo {
    /// Session identifier
    pub id: SessionId,
    /// Backend profile name
    pub backend: String,
    /// Current status
    pub status: SessionStatus,
    /// Number of expressions waiting or computing
    pub pending: usize,
}

impl SessionInfo {
    /// Create new session info.
    pub fn new(id: SessionId, backend: impl Into<String>, status: SessionStatus, pending: usize) -> Self {
        Self {
            id,
            backend: backend.into(),
            status,
            pending,
        }
    }
}
