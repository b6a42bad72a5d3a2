//! CLI command handlers.

pub mod call;
pub mod dispatch;
pub mod probe;
pub mod servers;
pub mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde_json::{Map, Value, json};

use relay_config::{HandshakePreference, LoadedConfig, McpServerEntry, RelayConfig};
use relay_mcp::{
    Bootstrap, DispatchOutcome, Dispatcher, HandshakeOrder, McpRegistry, McpServerConfig,
    SandboxPaths, Timeouts,
};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Explicit config file, if given.
    pub config_path: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Base directory for `SandboxPaths`.
    pub sandbox_dir: Option<PathBuf>,
}

impl Context {
    /// Discover and load the config, printing its warnings.
    pub fn load_config(&self) -> Result<LoadedConfig> {
        let loaded = relay_config::load_config(self.config_path.as_deref())?;
        for warning in &loaded.warnings {
            eprintln!("warning: {}", warning);
        }
        tracing::debug!(source = %loaded.source, "config loaded");
        Ok(loaded)
    }

    /// Server configs for every enabled entry.
    pub fn server_configs(&self, config: &RelayConfig) -> Vec<McpServerConfig> {
        config
            .servers()
            .into_iter()
            .map(|entry| server_entry_to_config(entry, config))
            .collect()
    }

    /// Bootstrap servers and report the ones that failed on stderr.
    pub async fn bootstrap(&self, configs: Vec<McpServerConfig>) -> Bootstrap {
        let boot = McpRegistry::bootstrap(configs).await;
        for failure in &boot.failures {
            eprintln!("warning: MCP server '{}' unavailable: {}", failure.server, failure.error);
        }
        boot
    }

    /// A dispatcher over `registry`, confined to `--sandbox-dir` when set.
    pub fn dispatcher(&self, registry: Arc<McpRegistry>) -> Dispatcher {
        let dispatcher = Dispatcher::new(registry);
        match &self.sandbox_dir {
            Some(dir) => dispatcher.with_rewriter(SandboxPaths::new(dir)),
            None => dispatcher,
        }
    }
}

/// Convert a config entry to a connection config, applying the global
/// `[framer]` and `[timeouts]` sections.
pub fn server_entry_to_config(entry: &McpServerEntry, config: &RelayConfig) -> McpServerConfig {
    let server = if entry.is_http() {
        let url = entry.url.clone().unwrap_or_default();
        entry
            .header_tuples()
            .into_iter()
            .fold(McpServerConfig::http(&entry.name, url), |server, (k, v)| {
                server.with_header(k, v)
            })
    } else {
        McpServerConfig::new(&entry.name, &entry.command)
            .with_args(entry.args.clone())
            .with_env(entry.env_tuples())
    };

    let timeouts = config.timeouts_or_default();
    let order = match entry.handshake.unwrap_or_default() {
        HandshakePreference::StrictFirst => HandshakeOrder::StrictFirst,
        HandshakePreference::MinimalFirst => HandshakeOrder::MinimalFirst,
    };

    server
        .with_timeouts(Timeouts {
            handshake: timeouts.handshake(),
            call: timeouts.call(),
        })
        .with_handshake_order(order)
        .with_notify_initialized(entry.notify_initialized)
        .with_max_noise_lines(
            entry
                .max_noise_lines
                .unwrap_or(config.framer_or_default().max_noise_lines),
        )
}

/// Parse a `--args` JSON object.
pub fn parse_arguments(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    let value: Value = serde_json::from_str(raw)
        .with_context(|| format!("--args is not valid JSON: {}", raw))?;
    match value {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--args must be a JSON object, got {}", other),
    }
}

/// Print the result of a dispatched plan.
pub fn print_outcome(outcome: &DispatchOutcome, ctx: &Context) -> Result<()> {
    match outcome {
        DispatchOutcome::Completed {
            server,
            tool,
            response,
        } => {
            if ctx.json_output {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "status": "completed",
                        "server": server,
                        "tool": tool,
                        "response": response,
                    }))?
                );
                return Ok(());
            }

            if let Some(error) = &response.error {
                println!("❌ {}.{} returned error {}: {}", server, tool, error.code, error.message);
                if let Some(data) = &error.data {
                    println!("{}", serde_json::to_string_pretty(data)?);
                }
                return Ok(());
            }

            match response.call_result() {
                Some(result) => {
                    let mark = if result.is_error() { "❌" } else { "✓" };
                    println!("{} {}.{}", mark, server, tool);
                    match result.text() {
                        Some(text) => println!("{}", text),
                        None => println!("{}", serde_json::to_string_pretty(&response.result)?),
                    }
                }
                None => {
                    println!("✓ {}.{}", server, tool);
                    println!("{}", serde_json::to_string_pretty(&response.result)?);
                }
            }
        }
        DispatchOutcome::ClarificationNeeded { justification } => {
            if ctx.json_output {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "status": "clarification_needed",
                        "justification": justification,
                    }))?
                );
            } else {
                println!("The plan names no tool; clarification needed.");
                if let Some(reason) = justification {
                    println!("  {}", reason);
                }
            }
        }
    }
    Ok(())
}

/// Truncate a string to a maximum length.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
