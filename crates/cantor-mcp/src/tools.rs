//! MCP Tool Types
//!
//! Parameter and response types for every tool the server exposes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use cantor_core::{
    BackendProfile, Capability, ExpressionSnapshot, ExtensionKind, SessionInfo, SessionStatus,
    TransportKind, VariableManagementExtension,
};

// =============================================================================
// Session Management Tools
// =============================================================================

/// Parameters for session_create
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionCreateParams {
    /// Backend profile name (e.g., "octave", "scilab")
    pub backend: String,

    /// Interpreter executable, overriding the profile's program
    #[serde(default)]
    pub program: Option<String>,

    /// Interpreter arguments, replacing the profile's arguments
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

/// Response for session_create
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionCreateResponse {
    /// Unique session identifier
    pub session_id: String,

    /// Backend the session runs
    pub backend: String,

    /// Session status after login
    pub status: SessionStatus,

    /// Success message
    pub message: String,
}

/// Parameters for session_list
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionListParams {}

/// Response for session_list
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionListResponse {
    /// Registered sessions
    pub sessions: Vec<SessionInfo>,

    /// Total count
    pub count: usize,
}

/// Parameters for tools addressing one session
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionIdParams {
    /// Session ID
    pub session_id: String,
}

/// Response for session_close and session_interrupt
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionActionResponse {
    /// Session ID
    pub session_id: String,

    /// Session status after the action
    pub status: SessionStatus,

    /// Result message
    pub message: String,
}

// =============================================================================
// Expression Tools
// =============================================================================

/// Parameters for expression_evaluate
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExpressionEvaluateParams {
    /// Session ID
    pub session_id: String,

    /// Command text, may span several lines
    pub command: String,

    /// How long to wait for the result (milliseconds); 0 returns immediately
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

/// Parameters for expression_status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExpressionStatusParams {
    /// Session ID
    pub session_id: String,

    /// Expression ID returned by expression_evaluate
    pub expression_id: u64,
}

/// Response for expression_evaluate and expression_status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExpressionResponse {
    /// Session ID
    pub session_id: String,

    /// Whether the expression reached a terminal status
    pub finished: bool,

    /// Current view of the expression
    pub expression: ExpressionSnapshot,
}

// =============================================================================
// Extension Tools
// =============================================================================

/// Parameters for script_run
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScriptRunParams {
    /// Session ID
    pub session_id: String,

    /// Path of the script file, as the interpreter sees it
    pub path: String,

    /// How long to wait for the result (milliseconds)
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

/// Variable operation requested through variable_command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VariableAction {
    /// Assign `value` to `name`
    Set,
    /// Remove `name`
    Remove,
    /// Remove every variable
    Clear,
    /// Save the workspace to `file`
    Save,
    /// Load the workspace from `file`
    Load,
}

/// Parameters for variable_command
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VariableCommandParams {
    /// Session ID
    pub session_id: String,

    /// Operation to perform
    pub action: VariableAction,

    /// Variable name (set, remove)
    #[serde(default)]
    pub name: Option<String>,

    /// Value expression (set)
    #[serde(default)]
    pub value: Option<String>,

    /// Workspace file (save, load)
    #[serde(default)]
    pub file: Option<String>,

    /// How long to wait for the result (milliseconds)
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

impl VariableCommandParams {
    /// Statement performing the action in the backend's language.
    pub fn statement(&self, extension: &VariableManagementExtension) -> Result<String, String> {
        fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str, String> {
            field
                .as_deref()
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| format!("'{name}' is required for this action"))
        }

        Ok(match self.action {
            VariableAction::Set => extension.set_value(
                required(&self.name, "name")?,
                required(&self.value, "value")?,
            ),
            VariableAction::Remove => extension.remove_variable(required(&self.name, "name")?),
            VariableAction::Clear => extension.clear_variables(),
            VariableAction::Save => extension.save_variables(required(&self.file, "file")?),
            VariableAction::Load => extension.load_variables(required(&self.file, "file")?),
        })
    }
}

/// Parameters for last_result
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LastResultParams {
    /// Session ID
    pub session_id: String,

    /// How long to wait for the result (milliseconds)
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

// =============================================================================
// Backend Tools
// =============================================================================

/// Parameters for backend_list
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BackendListParams {}

/// Summary of one backend profile
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BackendSummary {
    /// Profile name
    pub name: String,

    /// Interpreter executable
    pub program: String,

    /// How the interpreter is attached
    pub transport: TransportKind,

    /// Advertised capabilities
    pub capabilities: Vec<Capability>,

    /// Command-template extensions
    pub extensions: Vec<ExtensionKind>,
}

impl From<&BackendProfile> for BackendSummary {
    fn from(profile: &BackendProfile) -> Self {
        Self {
            name: profile.name.clone(),
            program: profile.program.clone(),
            transport: profile.transport,
            capabilities: profile.capabilities.iter().copied().collect(),
            extensions: profile.extensions.kinds(),
        }
    }
}

/// Response for backend_list
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BackendListResponse {
    /// Known backends
    pub backends: Vec<BackendSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_create_params_defaults() {
        let params: SessionCreateParams =
            serde_json::from_str(r#"{"backend": "octave"}"#).unwrap();
        assert_eq!(params.backend, "octave");
        assert!(params.program.is_none());
        assert!(params.args.is_none());
    }

    #[test]
    fn test_variable_statements() {
        let octave = BackendProfile::octave();
        let extension = octave.extensions.variable_management().unwrap();
        let params = |json: &str| -> VariableCommandParams { serde_json::from_str(json).unwrap() };

        let set = params(r#"{"session_id": "s", "action": "set", "name": "x", "value": "[1 2]"}"#);
        assert_eq!(set.statement(extension).unwrap(), "x = [1 2]");
        let clear = params(r#"{"session_id": "s", "action": "clear"}"#);
        assert_eq!(clear.statement(extension).unwrap(), "clear;");
        let save = params(r#"{"session_id": "s", "action": "save", "file": "ws.mat"}"#);
        assert_eq!(save.statement(extension).unwrap(), "save ws.mat;");

        let missing = params(r#"{"session_id": "s", "action": "remove"}"#);
        assert!(missing.statement(extension).unwrap_err().contains("name"));
    }

    #[test]
    fn test_backend_summary_from_profile() {
        let summary = BackendSummary::from(&BackendProfile::octave());
        assert_eq!(summary.name, "octave");
        assert_eq!(summary.program, "octave-cli");
        assert!(summary.capabilities.contains(&Capability::Completion));
        assert!(summary.extensions.contains(&ExtensionKind::History));
    }
}
