//! Configuration types mapping to the TOML and JSON schemas.
//!
//! TOML:
//! ```toml
//! [mcp]                    # server list
//! [[mcp.servers]]          # one entry per server
//! [framer]                 # stdout noise budget
//! [timeouts]               # handshake / call deadlines
//! ```
//!
//! JSON:
//! ```json
//! { "mcpServers": { "<name>": { "command": "...", "args": [] } } }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::expand::expand_with;
use crate::{ConfigError, Result};

/// Default line budget for non-JSON stdout output per message.
pub const DEFAULT_MAX_NOISE_LINES: usize = 500;

/// Default URL of the environment fallback `local` server.
pub const DEFAULT_LOCAL_URL: &str = "http://localhost:8080/mcp";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional; missing sections fall back to their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// MCP server configuration.
    pub mcp: Option<McpConfig>,

    /// Stdout framing configuration.
    pub framer: Option<FramerConfig>,

    /// Request deadlines.
    pub timeouts: Option<TimeoutsConfig>,
}

impl RelayConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Parse a JSON `mcpServers` document.
    ///
    /// Server order follows the server names; a trailing `/` on URLs is dropped.
    pub fn from_mcp_json(json_str: &str) -> Result<Self> {
        let doc: McpJsonDocument = serde_json::from_str(json_str)?;
        let servers = doc
            .mcp_servers
            .into_iter()
            .map(|(name, entry)| entry.into_entry(name))
            .collect();
        Ok(Self {
            mcp: Some(McpConfig {
                enabled: true,
                servers,
            }),
            framer: None,
            timeouts: None,
        })
    }

    /// Build the fallback config from `MCP_LOCAL_URL` and `MCP_REMOTE_URL`.
    ///
    /// `local` is always present (default [`DEFAULT_LOCAL_URL`]); `remote`
    /// only when its variable is set and non-empty.
    pub fn from_env_fallback<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let local = non_empty("MCP_LOCAL_URL").unwrap_or_else(|| DEFAULT_LOCAL_URL.to_string());
        let mut servers = vec![McpServerEntry::http("local", local)];
        if let Some(remote) = non_empty("MCP_REMOTE_URL") {
            servers.push(McpServerEntry::http("remote", remote));
        }

        Self {
            mcp: Some(McpConfig {
                enabled: true,
                servers,
            }),
            ..Self::default()
        }
    }

    /// Enabled servers, or none when `[mcp] enabled = false`.
    pub fn servers(&self) -> Vec<&McpServerEntry> {
        match &self.mcp {
            Some(mcp) if mcp.enabled => mcp.servers.iter().filter(|s| s.enabled).collect(),
            _ => Vec::new(),
        }
    }

    /// Look up an enabled server by name.
    pub fn server(&self, name: &str) -> Option<&McpServerEntry> {
        self.servers().into_iter().find(|s| s.name == name)
    }

    /// The framer section, or its defaults.
    pub fn framer_or_default(&self) -> FramerConfig {
        self.framer.clone().unwrap_or_default()
    }

    /// The timeouts section, or its defaults.
    pub fn timeouts_or_default(&self) -> TimeoutsConfig {
        self.timeouts.clone().unwrap_or_default()
    }

    /// Check server entries for missing fields and duplicate names.
    pub fn validate(&self) -> Result<()> {
        let Some(mcp) = &self.mcp else {
            return Ok(());
        };

        let mut seen = HashSet::new();
        for (index, entry) in mcp.servers.iter().enumerate() {
            entry.validate(index)?;
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigError::DuplicateServer(entry.name.clone()));
            }
        }
        Ok(())
    }

    /// Expand `~/` and `$VAR` placeholders in every server entry.
    pub fn expand_placeholders<F>(&mut self, home: Option<&Path>, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mcp) = &mut self.mcp {
            for entry in &mut mcp.servers {
                entry.expand_placeholders(home, &lookup);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// MCP (Model Context Protocol) configuration.
///
/// ```toml
/// [mcp]
/// enabled = true
///
/// [[mcp.servers]]
/// name = "filesystem"
/// command = "npx"
/// args = ["-y", "@modelcontextprotocol/server-filesystem", "$HOME/projects"]
/// env = [["DEBUG", "1"]]
/// notify_initialized = true
///
/// [[mcp.servers]]
/// name = "local"
/// transport = "http"
/// url = "http://localhost:8080/mcp"
/// headers = [["Authorization", "Bearer ${MCP_TOKEN}"]]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct McpConfig {
    /// Whether MCP is enabled globally.
    pub enabled: bool,
    /// Configured MCP servers.
    #[serde(default)]
    pub servers: Vec<McpServerEntry>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            servers: Vec::new(),
        }
    }
}

/// Transport type for MCP server connections.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportType {
    /// Stdio transport - spawns a child process.
    #[default]
    Stdio,
    /// HTTP transport - one POST per message.
    Http,
}

/// Which `initialize` shape a server is offered first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HandshakePreference {
    /// Full params first.
    #[default]
    StrictFirst,
    /// `params: {}` first.
    MinimalFirst,
}

impl HandshakePreference {
    /// The kebab-case name used in config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrictFirst => "strict-first",
            Self::MinimalFirst => "minimal-first",
        }
    }
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpServerEntry {
    /// Unique name for this server.
    pub name: String,
    /// Transport type (stdio or http). Defaults to stdio.
    #[serde(default)]
    pub transport: McpTransportType,
    /// Command to execute to start the server (for stdio transport).
    #[serde(default)]
    pub command: String,
    /// URL for the server (for HTTP transport).
    pub url: Option<String>,
    /// Arguments to pass to the command (for stdio transport).
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables to set (as [key, value] pairs, for stdio transport).
    #[serde(default)]
    pub env: Vec<[String; 2]>,
    /// HTTP headers to set (as [key, value] pairs, for HTTP transport).
    #[serde(default)]
    pub headers: Vec<[String; 2]>,
    /// Send `notifications/initialized` after the handshake.
    #[serde(default)]
    pub notify_initialized: bool,
    /// Handshake shape order. Defaults to strict-first.
    pub handshake: Option<HandshakePreference>,
    /// Per-server override of `[framer] max_noise_lines`.
    pub max_noise_lines: Option<usize>,
    /// Whether this server is enabled. Defaults to true.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl McpServerEntry {
    /// Create a new MCP server entry for stdio transport.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: McpTransportType::Stdio,
            command: command.into(),
            url: None,
            args: Vec::new(),
            env: Vec::new(),
            headers: Vec::new(),
            notify_initialized: false,
            handshake: None,
            max_noise_lines: None,
            enabled: true,
        }
    }

    /// Create a new MCP server entry for HTTP transport.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            transport: McpTransportType::Http,
            url: Some(url.into()),
            ..Self::new(name, String::new())
        }
    }

    /// Add an argument (for stdio transport).
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an environment variable (for stdio transport).
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push([key.into(), value.into()]);
        self
    }

    /// Add an HTTP header (for HTTP transport).
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push([key.into(), value.into()]);
        self
    }

    /// Send `notifications/initialized` after the handshake.
    pub fn with_notify_initialized(mut self, notify: bool) -> Self {
        self.notify_initialized = notify;
        self
    }

    /// Set the handshake order.
    pub fn with_handshake(mut self, handshake: HandshakePreference) -> Self {
        self.handshake = Some(handshake);
        self
    }

    /// Set enabled state.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check if this is an HTTP transport.
    pub fn is_http(&self) -> bool {
        matches!(self.transport, McpTransportType::Http)
    }

    /// Check if this is a stdio transport.
    pub fn is_stdio(&self) -> bool {
        matches!(self.transport, McpTransportType::Stdio)
    }

    /// Environment variables as tuples.
    pub fn env_tuples(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|[k, v]| (k.clone(), v.clone()))
            .collect()
    }

    /// HTTP headers as tuples.
    pub fn header_tuples(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|[k, v]| (k.clone(), v.clone()))
            .collect()
    }

    /// `command args...` for stdio servers, the URL for HTTP ones.
    pub fn target(&self) -> String {
        match self.transport {
            McpTransportType::Http => self.url.clone().unwrap_or_default(),
            McpTransportType::Stdio if self.args.is_empty() => self.command.clone(),
            McpTransportType::Stdio => format!("{} {}", self.command, self.args.join(" ")),
        }
    }

    fn validate(&self, index: usize) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName { index });
        }
        match self.transport {
            McpTransportType::Stdio if self.command.trim().is_empty() => {
                Err(ConfigError::MissingCommand {
                    server: self.name.clone(),
                })
            }
            McpTransportType::Http if self.url.as_deref().is_none_or(|u| u.trim().is_empty()) => {
                Err(ConfigError::MissingUrl {
                    server: self.name.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn expand_placeholders<F>(&mut self, home: Option<&Path>, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let expand = |value: &str| expand_with(value, home, lookup);

        self.command = expand(&self.command);
        self.args = self.args.iter().map(|a| expand(a)).collect();
        for [_, value] in &mut self.env {
            *value = expand(value);
        }
        for [_, value] in &mut self.headers {
            *value = expand(value);
        }
        self.url = self.url.as_deref().map(expand);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Framer / Timeouts
// ─────────────────────────────────────────────────────────────────────────────

/// Stdout framing configuration.
///
/// ```toml
/// [framer]
/// max_noise_lines = 500
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FramerConfig {
    /// Non-JSON lines tolerated before a message.
    pub max_noise_lines: usize,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            max_noise_lines: DEFAULT_MAX_NOISE_LINES,
        }
    }
}

/// Request deadlines, in seconds.
///
/// ```toml
/// [timeouts]
/// handshake_secs = 30
/// call_secs = 60
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Deadline for `initialize`, notifications and `tools/list`.
    pub handshake_secs: u64,
    /// Deadline for `tools/call`.
    pub call_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            handshake_secs: 30,
            call_secs: 60,
        }
    }
}

impl TimeoutsConfig {
    /// Handshake deadline.
    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }

    /// Tool call deadline.
    pub fn call(&self) -> Duration {
        Duration::from_secs(self.call_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON `mcpServers` documents
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpJsonDocument {
    #[serde(default)]
    mcp_servers: BTreeMap<String, JsonServerEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonServerEntry {
    #[serde(default)]
    transport: McpTransportType,
    #[serde(default)]
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    url: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    notify_initialized: bool,
    handshake: Option<HandshakePreference>,
    max_noise_lines: Option<usize>,
    #[serde(default)]
    disabled: bool,
}

impl JsonServerEntry {
    fn into_entry(self, name: String) -> McpServerEntry {
        // A URL alone implies HTTP.
        let transport = if self.url.is_some() && self.command.is_empty() {
            McpTransportType::Http
        } else {
            self.transport
        };

        McpServerEntry {
            name,
            transport,
            command: self.command,
            url: self.url.map(|u| u.trim_end_matches('/').to_string()),
            args: self.args,
            env: self.env.into_iter().map(|(k, v)| [k, v]).collect(),
            headers: self.headers.into_iter().map(|(k, v)| [k, v]).collect(),
            notify_initialized: self.notify_initialized,
            handshake: self.handshake,
            max_noise_lines: self.max_noise_lines,
            enabled: !self.disabled,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
