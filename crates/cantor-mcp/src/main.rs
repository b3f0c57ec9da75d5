//! # Cantor MCP Server
//!
//! Model Context Protocol server for AI agents to evaluate commands in
//! mathematics interpreters (Octave, Scilab and configured REPLs).
//!
//! ## Overview
//!
//! This server provides MCP tools for:
//! - Session management (create, list, close, interrupt)
//! - Expression evaluation with ordered, per-command results
//! - Backend discovery
//!
//! ## Architecture
//!
//! This is Layer 3 - the main MCP server binary that ties together:
//! - cantor-core: Core types and configuration
//! - cantor-session: Session lifecycle and expression queue

use anyhow::Context;
use cantor_core::AppConfig;
use cantor_mcp::CantorMcpServer;
use rmcp::{transport::stdio, ServiceExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|index| args.get(index + 1));

    let config = match config_path {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {path}"))?,
        None => AppConfig::default(),
    };

    // Initialize logging; logs go to stderr, stdout carries the protocol
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level)),
        )
        .init();

    tracing::info!(
        "Cantor MCP Server v{} starting ({} backends, max {} sessions)...",
        env!("CARGO_PKG_VERSION"),
        config.profiles().len(),
        config.server.max_sessions
    );

    let server = CantorMcpServer::with_config(config);

    tracing::info!("Server initialized, starting stdio transport...");

    // Serve the MCP server over stdio
    let service = server.clone().serve(stdio()).await.map_err(|e| {
        tracing::error!("Error starting server: {}", e);
        e
    })?;

    tracing::info!("Cantor MCP Server running on stdio");

    // Wait for the service to complete
    service.waiting().await?;

    tracing::info!("Cantor MCP Server shutting down");
    server.manager().close_all().await?;

    Ok(())
}
