//! `relay tools` - bootstrap every server and show the aggregated catalog.

use anyhow::Result;
use clap::Args;

use super::Context;

/// Arguments for `relay tools`.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Print the planner prompt block instead of a listing
    #[arg(long)]
    pub prompt: bool,

    /// Show full input schemas
    #[arg(long)]
    pub full: bool,
}

/// Run `relay tools`.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let boot = ctx.bootstrap(ctx.server_configs(&loaded.config)).await;
    let registry = boot.registry;
    let catalog = registry.catalog().await;

    if args.prompt {
        print!("{}", catalog.render_for_planner());
    } else if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&catalog.to_json())?);
    } else if catalog.is_empty() {
        println!("No tools available.");
    } else {
        for server in catalog.servers() {
            let tools = catalog.server_tools(server);
            println!("{} ({} tools)", server, tools.len());
            for tool in tools {
                println!("  • {}", tool.name);
                if let Some(desc) = &tool.description {
                    for line in textwrap_simple(desc, 70).lines() {
                        println!("      {}", line);
                    }
                }
                if args.full
                    && let Some(schema) = &tool.input_schema
                {
                    println!("      Schema: {}", serde_json::to_string(schema)?);
                }
            }
            println!();
        }
        println!(
            "{} tools from {} servers",
            catalog.len(),
            catalog.servers().count()
        );
    }

    registry.shutdown_all().await;
    Ok(())
}

/// Simple text wrapping helper.
fn textwrap_simple(text: &str, max_width: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current = word.to_string();
        } else if current.len() + 1 + word.len() <= max_width {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_textwrap_simple() {
        assert_eq!(textwrap_simple("one two three", 7), "one two\nthree");
        assert_eq!(textwrap_simple("", 10), "");
        assert_eq!(textwrap_simple("averyveryverylongword x", 5), "averyveryverylongword\nx");
    }
}
