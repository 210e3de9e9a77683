//! Hexray CLI - Elixir code intelligence from the command line
//!
//! # Usage
//!
//! ```bash
//! # Build the index for the current project
//! hexray index
//!
//! # Ask questions
//! hexray query definition --mfa "MyApp.Accounts.get_user/1"
//! hexray query callers --mfa "MyApp.Repo.insert/1" --depth 3
//! hexray query routes
//! hexray query impact --files lib/my_app/accounts.ex
//!
//! # Serve the graph to an AI assistant
//! hexray mcp
//! ```
//!
//! Results are printed as a single JSON object on stdout; human-facing
//! messages go to stderr.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

/// Hexray - code intelligence indexer for Elixir projects
#[derive(Parser, Debug)]
#[command(name = "hexray")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

/// Global options available to all commands
#[derive(Args, Debug, Clone)]
struct GlobalOptions {
    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Skip the compiler-backed extraction phases (tracer, xref, diagnostics)
    #[arg(long, global = true, env = "HEXRAY_NO_COMPILE")]
    no_compile: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build or rebuild the code index
    Index(commands::index::IndexArgs),

    /// Query the index (definition, references, callers, callees, routes,
    /// schema, impact, spec, types, diagnostics)
    Query(commands::query::QueryArgs),

    /// Start the MCP server for AI assistant integration
    Mcp(commands::mcp::McpArgs),

    /// Show index status for a project
    Status(commands::status::StatusArgs),

    /// Remove the index directory
    Clean(commands::clean::CleanArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = if cli.global.quiet {
        Level::ERROR
    } else if cli.global.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    // MCP command handles its own tracing setup (needs ansi=false since
    // stdout carries the JSON-RPC protocol)
    if !matches!(cli.command, Commands::Mcp(_)) {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    match cli.command {
        Commands::Index(args) => commands::index::execute(args, cli.global).await,
        Commands::Query(args) => commands::query::execute(args, cli.global).await,
        Commands::Mcp(args) => commands::mcp::execute(args, cli.global).await,
        Commands::Status(args) => commands::status::execute(args, cli.global).await,
        Commands::Clean(args) => commands::clean::execute(args, cli.global).await,
    }
}
