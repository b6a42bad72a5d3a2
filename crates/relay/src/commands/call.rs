//! `relay call` - call one tool on one server.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use relay_mcp::Plan;

use super::{Context, parse_arguments, print_outcome, server_entry_to_config};

/// Arguments for `relay call`.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// MCP server name
    pub server: String,

    /// Tool name
    pub tool: String,

    /// Tool arguments as a JSON object
    #[arg(long)]
    pub args: Option<String>,
}

/// Run `relay call`.
pub async fn run(args: CallArgs, ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let arguments = parse_arguments(args.args.as_deref())?;

    // Only the named server is started.
    let configs: Vec<_> = loaded
        .config
        .server(&args.server)
        .map(|entry| server_entry_to_config(entry, &loaded.config))
        .into_iter()
        .collect();
    if configs.is_empty() {
        let names: Vec<&str> = loaded
            .config
            .servers()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        anyhow::bail!(
            "MCP server '{}' not found (configured: {})",
            args.server,
            names.join(", ")
        );
    }

    let boot = ctx.bootstrap(configs).await;
    let registry = Arc::new(boot.registry);
    let dispatcher = ctx.dispatcher(registry.clone());

    let plan = Plan::new(&args.server, &args.tool).with_arguments(arguments);
    let outcome = dispatcher.dispatch(plan).await;
    registry.shutdown_all().await;

    print_outcome(&outcome?, ctx)
}
