//! Relay - planner-driven multi-server MCP client
//!
//! Main entry point for the Relay CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{call, dispatch, probe, servers, tools};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Relay - planner-driven multi-server MCP client
#[derive(Parser)]
#[command(name = "relay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (TOML or JSON mcpServers document); RELAY_CONFIG is
    /// consulted when absent
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Confine path arguments of tool calls to this directory
    #[arg(long, global = true)]
    pub sandbox_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured MCP servers
    Servers(servers::ServersArgs),

    /// Connect to all servers and show the aggregated tool catalog
    Tools(tools::ToolsArgs),

    /// Walk one server through handshake, discovery and an optional call
    Probe(probe::ProbeArgs),

    /// Call a tool on a server
    Call(call::CallArgs),

    /// Parse planner output and carry out the plan
    Dispatch(dispatch::DispatchArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console on stderr (stdout carries command output) + rotating JSON file
    let filter = if cli.verbose {
        "relay=debug,relay_mcp=debug,relay_config=debug,info"
    } else {
        "relay=info,relay_mcp=info,relay_config=info,warn"
    };
    let console_filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new(filter)
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter))
    };

    let log_dir = relay_config::config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("relay.log")
        .build(&log_dir);
    let (file_writer, _guard) = match file_appender {
        Ok(appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (Some(non_blocking), Some(guard))
        }
        Err(e) => {
            eprintln!("warning: file logging disabled ({}): {}", log_dir.display(), e);
            (None, None)
        }
    };

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "relay=trace,relay_mcp=trace,relay_config=trace,info",
                ))
        }))
        .init();

    let ctx = commands::Context {
        config_path: cli.config,
        json_output: cli.json,
        verbose: cli.verbose,
        sandbox_dir: cli.sandbox_dir,
    };

    match cli.command {
        Commands::Servers(args) => servers::run(args, &ctx).await,
        Commands::Tools(args) => tools::run(args, &ctx).await,
        Commands::Probe(args) => probe::run(args, &ctx).await,
        Commands::Call(args) => call::run(args, &ctx).await,
        Commands::Dispatch(args) => dispatch::run(args, &ctx).await,
    }
}
