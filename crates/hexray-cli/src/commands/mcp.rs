//! MCP server command
//!
//! Starts the hexray MCP server for AI assistant integration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use hexray_mcp::{HexrayServer, ServerConfig};
use rmcp::{transport::stdio, ServiceExt};
use tracing::{info, Level};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::FmtSubscriber;

use crate::GlobalOptions;

/// Start the MCP server for AI assistant integration
#[derive(Args, Debug)]
pub struct McpArgs {
    /// Project root to serve (default: current directory)
    #[arg(long)]
    path: Option<PathBuf>,

    /// Transport to use (only stdio is supported)
    #[arg(long, default_value = "stdio")]
    transport: String,

    /// Log file path (default: stderr)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

pub async fn execute(args: McpArgs, global: GlobalOptions) -> Result<()> {
    // Set up logging (must be stderr or a file - stdout carries JSON-RPC)
    let log_level = if global.verbose {
        Level::DEBUG
    } else if global.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    if let Some(ref log_file) = args.log_file {
        let file = std::fs::File::create(log_file)
            .with_context(|| format!("Failed to create log file: {}", log_file.display()))?;
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(file)
            .with_ansi(false)
            .finish();
        let _ = subscriber.try_init();
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .finish();
        // Silently use an existing subscriber if one is already set
        let _ = subscriber.try_init();
    }

    if args.transport != "stdio" {
        anyhow::bail!("unsupported transport: {} (only stdio)", args.transport);
    }

    let root = super::resolve_root(args.path);
    let root = root.canonicalize().unwrap_or(root);
    if !root.exists() {
        anyhow::bail!("Project root does not exist: {}", root.display());
    }

    info!("Starting hexray MCP server");
    info!("  Project: {}", root.display());

    let mut config = ServerConfig::new(&root);
    if global.no_compile {
        config = config.without_compiler_phases();
    }

    let server = HexrayServer::new(config).context("Failed to create MCP server")?;
    info!("Server initialized, starting MCP protocol over stdio");

    let service = server
        .serve(stdio())
        .await
        .context("Failed to start MCP service")?;

    service.waiting().await?;
    info!("Server shutdown complete");
    Ok(())
}
