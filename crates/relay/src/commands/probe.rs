//! `relay probe` - walk one server through the protocol step by step.
//!
//! Steps: connect → initialize → notifications/initialized → tools/list →
//! optional tools/call. Each step is reported as it completes so a broken
//! server shows exactly where it stops cooperating.

use anyhow::Result;
use clap::Args;
use serde_json::{Value, json};

use relay_mcp::McpSession;

use super::{Context, parse_arguments, server_entry_to_config};

/// Arguments for `relay probe`.
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Name of the MCP server to probe
    pub name: String,

    /// Call this tool after discovery
    #[arg(long)]
    pub tool: Option<String>,

    /// Tool arguments as a JSON object
    #[arg(long, requires = "tool")]
    pub args: Option<String>,
}

/// Collects step results for `--json` or prints them as they happen.
struct Report<'a> {
    ctx: &'a Context,
    steps: Vec<Value>,
}

impl<'a> Report<'a> {
    fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            steps: Vec::new(),
        }
    }

    fn ok(&mut self, step: &str, message: String, detail: Value) {
        if !self.ctx.json_output {
            println!("✓ {}", message);
        }
        self.steps
            .push(json!({"step": step, "status": "ok", "detail": detail}));
    }

    fn failed(&mut self, step: &str, error: &dyn std::fmt::Display) {
        if !self.ctx.json_output {
            println!("❌ {} failed: {}", step, error);
        }
        self.steps
            .push(json!({"step": step, "status": "error", "error": error.to_string()}));
    }

    fn finish(self, server: &str, success: bool) -> Result<()> {
        if self.ctx.json_output {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "server": server,
                    "status": if success { "success" } else { "error" },
                    "steps": self.steps,
                }))?
            );
        } else if success {
            println!();
            println!("✓ Probe successful");
        }
        Ok(())
    }
}

/// Run `relay probe`.
pub async fn run(args: ProbeArgs, ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let entry = loaded.config.server(&args.name).ok_or_else(|| {
        anyhow::anyhow!(
            "MCP server '{}' not found. Use 'relay servers' to see configured servers.",
            args.name
        )
    })?;
    let arguments = parse_arguments(args.args.as_deref())?;

    if !ctx.json_output {
        println!("Probing MCP server: {}", args.name);
        println!("  Target: {}", entry.target());
        println!();
    }

    let mut report = Report::new(ctx);
    let session = match server_entry_to_config(entry, &loaded.config).open_session() {
        Ok(session) => session,
        Err(e) => {
            report.failed("connect", &e);
            report.finish(&args.name, false)?;
            return Err(e.into());
        }
    };
    report.ok("connect", format!("Connected ({})", session.transport_kind()), Value::Null);

    let outcome = probe_session(&session, args.tool.as_deref(), arguments, &mut report).await;
    if let Err(e) = session.shutdown().await {
        tracing::debug!(server = %args.name, error = %e, "probe teardown");
    }

    report.finish(&args.name, outcome.is_ok())?;
    outcome
}

async fn probe_session(
    session: &McpSession,
    tool: Option<&str>,
    arguments: serde_json::Map<String, Value>,
    report: &mut Report<'_>,
) -> Result<()> {
    let init = match session.initialize().await {
        Ok(init) => init,
        Err(e) => {
            report.failed("initialize", &e);
            return Err(e.into());
        }
    };
    let server = init
        .server_info
        .as_ref()
        .map(|i| format!("{} v{}", i.name, i.version))
        .unwrap_or_else(|| "unknown server".to_string());
    report.ok(
        "initialize",
        format!(
            "Initialized: {} (protocol {})",
            server,
            init.protocol_version.as_deref().unwrap_or("unspecified")
        ),
        json!({
            "protocolVersion": init.protocol_version,
            "serverInfo": init.server_info,
            "capabilities": init.capabilities,
        }),
    );

    match session.notify_initialized().await {
        Ok(()) => report.ok(
            "notify",
            "Sent notifications/initialized".to_string(),
            Value::Null,
        ),
        Err(e) => {
            report.failed("notify", &e);
            return Err(e.into());
        }
    }

    let tools = match session.list_tools().await {
        Ok(tools) => tools,
        Err(e) => {
            report.failed("tools/list", &e);
            return Err(e.into());
        }
    };
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    report.ok(
        "tools/list",
        format!("Listed {} tools: {}", tools.len(), names.join(", ")),
        json!(names),
    );

    let Some(tool) = tool else {
        return Ok(());
    };
    match session.call_tool(tool, arguments).await {
        Ok(response) => {
            let message = match (&response.error, response.call_result()) {
                (Some(error), _) => format!("Called {}: JSON-RPC error {} {}", tool, error.code, error.message),
                (None, Some(result)) => format!(
                    "Called {}{}: {}",
                    tool,
                    if result.is_error() { " (tool error)" } else { "" },
                    result.text().unwrap_or_default()
                ),
                (None, None) => format!("Called {}", tool),
            };
            report.ok("tools/call", message, serde_json::to_value(&response)?);
            Ok(())
        }
        Err(e) => {
            report.failed("tools/call", &e);
            Err(e.into())
        }
    }
}
