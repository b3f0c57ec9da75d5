//! Cantor MCP Server Implementation
//!
//! This module implements the MCP server using rmcp 0.9's #[tool_router] pattern.
//! Tool calls are routed to the session manager, which owns the interpreters.

use std::sync::Arc;
use std::time::Duration;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ErrorData as McpError,
};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use cantor_core::{AppConfig, Error, ExpressionId, FinishingBehavior, SessionId};
use cantor_session::{Session, SessionManager, SessionManagerConfig};

use crate::tools::*;

/// Map a library error onto a JSON-RPC error.
fn mcp_error(context: &str, err: Error) -> McpError {
    let code = match &err {
        Error::SessionNotFound(_)
        | Error::ExpressionNotFound(_)
        | Error::BackendNotFound(_)
        | Error::InvalidInput(_)
        | Error::InvalidPattern { .. } => ErrorCode(-32602), // Invalid params
        _ => ErrorCode(-32603), // Internal error
    };
    McpError::new(code, format!("{context}: {err}"), None)
}

fn missing_extension(session: &Session, extension: &str) -> McpError {
    McpError::new(
        ErrorCode(-32602), // Invalid params
        format!(
            "Backend '{}' has no {extension} extension",
            session.profile().name
        ),
        None,
    )
}

fn json_result<T: Serialize>(response: &T, fallback: impl FnOnce() -> String) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(response).unwrap_or_else(|_| fallback()),
    )])
}

/// Cantor MCP Server
///
/// Exposes interpreter sessions and their expression queues as MCP tools.
#[derive(Clone)]
pub struct CantorMcpServer {
    /// Registry of logged-in sessions
    manager: Arc<SessionManager>,
    /// Backend profiles and timing settings
    config: Arc<AppConfig>,
    /// Tool router for handling MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl CantorMcpServer {
    /// Create a server with the built-in backends and default settings
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    /// Create a server from a loaded configuration
    pub fn with_config(config: AppConfig) -> Self {
        let manager = SessionManager::with_config(SessionManagerConfig::from(&config));
        Self::with_manager(config, manager)
    }

    /// Create a server around an existing session manager
    pub fn with_manager(config: AppConfig, manager: SessionManager) -> Self {
        Self {
            manager: Arc::new(manager),
            config: Arc::new(config),
            tool_router: Self::tool_router(),
        }
    }

    /// The session registry behind the tools
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    async fn get_session(&self, session_id: &str) -> Result<Session, McpError> {
        let uuid = Uuid::parse_str(session_id).map_err(|_| {
            McpError::new(
                ErrorCode(-32602), // Invalid params
                format!("Invalid session ID format: {session_id}"),
                None,
            )
        })?;
        self.manager
            .get_session(&SessionId::from(uuid))
            .await
            .map_err(|e| mcp_error("Failed to look up session", e))
    }

    /// Queue `command` and wait up to `wait_ms` (or the configured default).
    async fn queue_and_wait(
        &self,
        session_id: &str,
        session: &Session,
        command: &str,
        internal: bool,
        wait_ms: Option<u64>,
    ) -> Result<CallToolResult, McpError> {
        let handle = session
            .evaluate_expression(command, FinishingBehavior::DoNotDelete, internal)
            .await
            .map_err(|e| {
                warn!("Session {} refused the expression: {}", session_id, e);
                mcp_error("Failed to queue expression", e)
            })?;

        let wait = wait_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.session.evaluation_wait());

        let expression = match handle.wait_finished(wait).await {
            Ok(snapshot) => snapshot,
            Err(Error::WaitTimeout(ms)) => {
                debug!("Expression {} still pending after {}ms", handle.id(), ms);
                handle.snapshot()
            }
            Err(e) => return Err(mcp_error("Failed to evaluate expression", e)),
        };

        let response = ExpressionResponse {
            session_id: session_id.to_string(),
            finished: expression.status.is_terminal(),
            expression,
        };
        Ok(json_result(&response, || format!("{:?}", response.expression.status)))
    }

    /// Start an interpreter and log it in
    #[tool(description = "Start an interpreter session for a backend (e.g. octave, scilab) and log it in")]
    #[instrument(skip_all)]
    pub async fn session_create(
        &self,
        Parameters(params): Parameters<SessionCreateParams>,
    ) -> Result<CallToolResult, McpError> {
        info!(
            "Creating session: backend='{}', program={:?}, args={:?}",
            params.backend, params.program, params.args
        );

        let mut profile = self
            .config
            .backend(&params.backend)
            .map_err(|e| mcp_error("Unknown backend", e))?;
        if let Some(program) = params.program {
            profile.program = program;
        }
        if let Some(args) = params.args {
            profile.args = args;
        }

        let session = self.manager.create_session(profile).await.map_err(|e| {
            error!("Failed to create session: {}", e);
            mcp_error("Failed to create session", e)
        })?;

        let session_id = session.id().to_string();
        info!("Session created successfully: session_id={}", session_id);

        let response = SessionCreateResponse {
            session_id: session_id.clone(),
            backend: session.profile().name.clone(),
            status: session.status(),
            message: format!(
                "Logged in to '{}' using {}",
                session.profile().name,
                session.profile().program
            ),
        };

        Ok(json_result(&response, || session_id))
    }

    /// List registered sessions
    #[tool(description = "List all interpreter sessions with their status and queue length")]
    #[instrument(skip_all)]
    pub async fn session_list(
        &self,
        Parameters(_params): Parameters<SessionListParams>,
    ) -> Result<CallToolResult, McpError> {
        let sessions = self.manager.list_sessions().await;
        let count = sessions.len();
        debug!("Listing {} sessions", count);

        let response = SessionListResponse { sessions, count };
        Ok(json_result(&response, || format!("{count} sessions")))
    }

    /// Log a session out and forget it
    #[tool(description = "Log out of an interpreter session and terminate its process")]
    #[instrument(skip_all)]
    pub async fn session_close(
        &self,
        Parameters(params): Parameters<SessionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        info!("Closing session: session_id={}", params.session_id);

        let session = self.get_session(&params.session_id).await?;
        self.manager
            .close_session(&session.id())
            .await
            .map_err(|e| {
                error!("Failed to close session {}: {}", params.session_id, e);
                mcp_error("Failed to close session", e)
            })?;

        let response = SessionActionResponse {
            session_id: params.session_id.clone(),
            status: session.status(),
            message: format!("Session {} closed", params.session_id),
        };
        Ok(json_result(&response, || response.message.clone()))
    }

    /// Interrupt the running expression and drop the queue
    #[tool(description = "Interrupt the running expression; every queued expression is marked interrupted")]
    #[instrument(skip_all)]
    pub async fn session_interrupt(
        &self,
        Parameters(params): Parameters<SessionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        info!("Interrupting session: session_id={}", params.session_id);

        let session = self.get_session(&params.session_id).await?;
        session
            .interrupt()
            .await
            .map_err(|e| mcp_error("Failed to interrupt session", e))?;

        let response = SessionActionResponse {
            session_id: params.session_id.clone(),
            status: session.status(),
            message: "Interrupted".to_string(),
        };
        Ok(json_result(&response, || response.message.clone()))
    }

    /// Queue a command and wait a bounded time for its result
    #[tool(description = "Evaluate a command in a session. Waits up to wait_ms for the result; \
                          poll expression_status if it is still running")]
    #[instrument(skip_all)]
    pub async fn expression_evaluate(
        &self,
        Parameters(params): Parameters<ExpressionEvaluateParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!(
            "Evaluating in session {}: {:?}",
            params.session_id, params.command
        );

        let session = self.get_session(&params.session_id).await?;
        self.queue_and_wait(
            &params.session_id,
            &session,
            &params.command,
            false,
            params.wait_ms,
        )
        .await
    }

    /// Look an expression up by id
    #[tool(description = "Get the status and results of a previously evaluated expression")]
    #[instrument(skip_all)]
    pub async fn expression_status(
        &self,
        Parameters(params): Parameters<ExpressionStatusParams>,
    ) -> Result<CallToolResult, McpError> {
        let session = self.get_session(&params.session_id).await?;
        let handle = session
            .expression(ExpressionId::new(params.expression_id))
            .await
            .map_err(|e| mcp_error("Failed to look up expression", e))?;

        let expression = handle.snapshot();
        let response = ExpressionResponse {
            session_id: params.session_id.clone(),
            finished: expression.status.is_terminal(),
            expression,
        };
        Ok(json_result(&response, || format!("{:?}", response.expression.status)))
    }

    /// Run a script file through the backend's script extension
    #[tool(description = "Run a script file in a session using the backend's own script \
                          command (e.g. source for Octave, exec for Scilab)")]
    #[instrument(skip_all)]
    pub async fn script_run(
        &self,
        Parameters(params): Parameters<ScriptRunParams>,
    ) -> Result<CallToolResult, McpError> {
        info!(
            "Running script in session {}: {}",
            params.session_id, params.path
        );

        let session = self.get_session(&params.session_id).await?;
        let command = session
            .profile()
            .extensions
            .script()
            .map(|script| script.run_external_script(&params.path))
            .ok_or_else(|| missing_extension(&session, "script"))?;

        self.queue_and_wait(&params.session_id, &session, &command, false, params.wait_ms)
            .await
    }

    /// Set, remove, clear, save or load variables
    #[tool(description = "Manage interpreter variables: action is one of set (name, value), \
                          remove (name), clear, save (file) or load (file)")]
    #[instrument(skip_all)]
    pub async fn variable_command(
        &self,
        Parameters(params): Parameters<VariableCommandParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!(
            "Variable command in session {}: {:?}",
            params.session_id, params.action
        );

        let session = self.get_session(&params.session_id).await?;
        let extension = session
            .profile()
            .extensions
            .variable_management()
            .ok_or_else(|| missing_extension(&session, "variable management"))?;
        let command = params.statement(extension).map_err(|reason| {
            McpError::new(ErrorCode(-32602), format!("Invalid variable command: {reason}"), None)
        })?;

        self.queue_and_wait(&params.session_id, &session, &command, true, params.wait_ms)
            .await
    }

    /// Evaluate the backend's expression for the previous result
    #[tool(description = "Show the result of the previous computation (e.g. ans in Octave)")]
    #[instrument(skip_all)]
    pub async fn last_result(
        &self,
        Parameters(params): Parameters<LastResultParams>,
    ) -> Result<CallToolResult, McpError> {
        let session = self.get_session(&params.session_id).await?;
        let command = session
            .profile()
            .extensions
            .history()
            .map(|history| history.last_result().to_string())
            .ok_or_else(|| missing_extension(&session, "history"))?;

        self.queue_and_wait(&params.session_id, &session, &command, false, params.wait_ms)
            .await
    }

    /// List the backend profiles sessions can be created for
    #[tool(description = "List available interpreter backends and their capabilities")]
    #[instrument(skip_all)]
    pub async fn backend_list(
        &self,
        Parameters(_params): Parameters<BackendListParams>,
    ) -> Result<CallToolResult, McpError> {
        let backends: Vec<BackendSummary> =
            self.config.profiles().iter().map(BackendSummary::from).collect();
        debug!("Listing {} backends", backends.len());

        let response = BackendListResponse { backends };
        Ok(json_result(&response, || "backends".to_string()))
    }
}

impl Default for CantorMcpServer {
    fn default() -> Self {
        Self::new()
    }
}

// Implement the ServerHandler trait to define server capabilities
#[tool_handler]
impl rmcp::ServerHandler for CantorMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Cantor MCP Server - Evaluate commands in Octave, Scilab and other REPL \
                 interpreters. Use backend_list to see backends, session_create to start an \
                 interpreter, expression_evaluate to run commands in order, and \
                 expression_status to poll long computations. script_run, variable_command \
                 and last_result use the backend's own statements for common tasks."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
