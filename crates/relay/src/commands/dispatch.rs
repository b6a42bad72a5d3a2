//! `relay dispatch` - carry out a planner's output.
//!
//! Reads the planner text (argument or stdin), parses it leniently and hands
//! the plan to the dispatcher. Servers are only started when the plan names
//! a tool; a clarification plan is printed and exits successfully.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use tokio::io::AsyncReadExt;

use relay_mcp::{McpRegistry, Plan};

use super::{Context, print_outcome};

/// Arguments for `relay dispatch`.
#[derive(Args, Debug)]
pub struct DispatchArgs {
    /// Planner output text; `-` or nothing reads stdin
    pub plan: Option<String>,
}

/// Run `relay dispatch`.
pub async fn run(args: DispatchArgs, ctx: &Context) -> Result<()> {
    let raw = match args.plan.as_deref() {
        Some(text) if text != "-" => text.to_string(),
        _ => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("failed to read plan from stdin")?;
            buf
        }
    };

    let plan = match Plan::parse_lenient(&raw) {
        Ok(plan) => plan,
        Err(e) => {
            if ctx.verbose {
                eprintln!("cleaned planner output:\n{}", e.cleaned);
                if let Some(candidate) = &e.candidate {
                    eprintln!("candidate object:\n{}", candidate);
                }
            }
            return Err(e.into());
        }
    };
    tracing::debug!(server = ?plan.server, tool = ?plan.tool, "parsed plan");

    let registry = if plan.is_actionable() {
        let loaded = ctx.load_config()?;
        Arc::new(ctx.bootstrap(ctx.server_configs(&loaded.config)).await.registry)
    } else {
        Arc::new(McpRegistry::new())
    };

    let outcome = ctx.dispatcher(registry.clone()).dispatch(plan).await;
    registry.shutdown_all().await;

    print_outcome(&outcome?, ctx)
}
