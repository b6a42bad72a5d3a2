//! Aggregated tool catalog across every registered server.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::protocol::ToolInfo;

/// Longest input schema (in characters) shown to a planner.
pub const MAX_SCHEMA_CHARS: usize = 900;

/// Tools keyed by `(server, tool)`.
///
/// Iteration order is server name, then the order the server returned its
/// tools in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCatalog {
    servers: BTreeMap<String, Vec<ToolInfo>>,
}

impl ToolCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything known about `server`.
    pub fn set_server_tools(&mut self, server: impl Into<String>, tools: Vec<ToolInfo>) {
        self.servers.insert(server.into(), tools);
    }

    /// Look up one tool.
    pub fn get(&self, server: &str, tool: &str) -> Option<&ToolInfo> {
        self.servers.get(server)?.iter().find(|t| t.name == tool)
    }

    /// Whether `server` exposes `tool`.
    pub fn contains(&self, server: &str, tool: &str) -> bool {
        self.get(server, tool).is_some()
    }

    /// Tools exposed by one server, in server order.
    pub fn server_tools(&self, server: &str) -> &[ToolInfo] {
        self.servers.get(server).map(Vec::as_slice).unwrap_or_default()
    }

    /// Names of servers with an entry, sorted.
    pub fn servers(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    /// Every `(server, tool)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ToolInfo)> {
        self.servers
            .iter()
            .flat_map(|(server, tools)| tools.iter().map(move |t| (server.as_str(), t)))
    }

    /// Total number of tools.
    pub fn len(&self) -> usize {
        self.servers.values().map(Vec::len).sum()
    }

    /// Whether no server exposes any tool.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The catalog as a JSON array of `{server, name, description, inputSchema}`.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.iter()
                .map(|(server, tool)| {
                    json!({
                        "server": server,
                        "name": tool.name,
                        "description": tool.description,
                        "inputSchema": tool.input_schema,
                    })
                })
                .collect(),
        )
    }

    /// Text block listing every tool for a planner prompt.
    ///
    /// Schemas are rendered compactly and cut at [`MAX_SCHEMA_CHARS`].
    pub fn render_for_planner(&self) -> String {
        let mut lines = vec!["Available tools:".to_string(), String::new()];
        for (server, tool) in self.iter() {
            lines.push(format!("- server: {server}"));
            lines.push(format!("  tool: {}", tool.name));
            if let Some(description) = tool.description.as_deref().map(str::trim)
                && !description.is_empty()
            {
                lines.push(format!("  description: {}", one_line(description)));
            }
            lines.push(format!("  inputSchema: {}", compact_schema(tool.input_schema.as_ref())));
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn compact_schema(schema: Option<&Value>) -> String {
    let rendered = match schema {
        Some(value) if !value.is_null() => value.to_string(),
        _ => "{}".to_string(),
    };
    if rendered.chars().count() > MAX_SCHEMA_CHARS {
        let mut cut: String = rendered.chars().take(MAX_SCHEMA_CHARS).collect();
        cut.push('…');
        cut
    } else {
        rendered
    }
}
