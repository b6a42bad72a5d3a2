//! `relay servers` - list configured MCP servers.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use relay_config::{McpServerEntry, McpTransportType};

use super::{Context, truncate};

/// Arguments for `relay servers`.
#[derive(Args, Debug)]
pub struct ServersArgs {}

/// Run `relay servers`.
pub async fn run(_args: ServersArgs, ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let servers = loaded.config.servers();

    if ctx.json_output {
        let output: Vec<_> = servers.iter().map(|s| server_json(s)).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "source": loaded.source.to_string(),
                "servers": output,
            }))?
        );
        return Ok(());
    }

    if ctx.verbose {
        println!("Config: {}", loaded.source);
        println!();
    }

    if servers.is_empty() {
        println!("No MCP servers configured.");
        println!();
        println!("Add servers to ./relay.toml:");
        println!("  [[mcp.servers]]");
        println!("  name = \"fs\"");
        println!("  command = \"mcp-server-filesystem\"");
        return Ok(());
    }

    println!("{:<20} {:<10} {:<14} {:<40}", "NAME", "TRANSPORT", "HANDSHAKE", "TARGET");
    println!("{}", "-".repeat(84));

    for server in servers {
        println!(
            "{:<20} {:<10} {:<14} {:<40}",
            truncate(&server.name, 20),
            transport_name(server.transport),
            server.handshake.unwrap_or_default().as_str(),
            truncate(&server.target(), 40)
        );

        if ctx.verbose {
            if !server.env.is_empty() {
                println!("  Environment:");
                for [key, value] in &server.env {
                    println!("    {}={}", key, value);
                }
            }
            if !server.headers.is_empty() {
                println!("  Headers:");
                for [key, _] in &server.headers {
                    println!("    {}: ***", key);
                }
            }
            if server.notify_initialized {
                println!("  Sends notifications/initialized");
            }
        }
    }

    Ok(())
}

fn transport_name(transport: McpTransportType) -> &'static str {
    match transport {
        McpTransportType::Stdio => "stdio",
        McpTransportType::Http => "http",
    }
}

fn server_json(server: &McpServerEntry) -> serde_json::Value {
    let mut entry = json!({
        "name": server.name,
        "transport": transport_name(server.transport),
        "handshake": server.handshake.unwrap_or_default().as_str(),
        "notify_initialized": server.notify_initialized,
    });

    if server.is_http() {
        entry["url"] = json!(server.url);
    } else {
        entry["command"] = json!(server.command);
        entry["args"] = json!(server.args);
    }
    entry
}
