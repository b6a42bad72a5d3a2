//! Server configuration and the registry of live sessions.
//!
//! [`McpRegistry::bootstrap`] turns a list of [`McpServerConfig`]s into ready
//! sessions. Every server is brought up concurrently and independently: one
//! server failing its handshake or discovery only adds a
//! [`BootstrapFailure`] to the report, and its transport is torn down on the
//! spot.
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_mcp::{McpRegistry, McpServerConfig};
//!
//! let boot = McpRegistry::bootstrap(vec![
//!     McpServerConfig::new("git", "uvx").with_arg("mcp-server-git"),
//!     McpServerConfig::http("local", "http://localhost:8080/mcp"),
//! ])
//! .await;
//!
//! for failure in &boot.failures {
//!     eprintln!("{}: {}", failure.server, failure.error);
//! }
//! let catalog = boot.registry.catalog().await;
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;

use crate::catalog::ToolCatalog;
use crate::error::{McpError, Result};
use crate::session::{HandshakeOrder, McpSession, SessionOptions};
use crate::transport::{HttpTransport, HttpTransportConfig, StdioTransport, Timeouts, Transport};

/// Transport type for MCP server connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportType {
    /// Stdio transport - spawns a child process.
    #[default]
    Stdio,
    /// HTTP transport - POSTs to a remote endpoint.
    Http,
}

/// Configuration for one MCP server.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Unique name for this server.
    pub name: String,
    /// Transport type.
    pub transport: TransportType,
    /// Command to spawn (for stdio transport).
    pub command: String,
    /// Arguments to pass to the command.
    pub args: Vec<String>,
    /// Environment variables to set.
    pub env: Vec<(String, String)>,
    /// URL for the server (for HTTP transport).
    pub url: Option<String>,
    /// HTTP headers (for HTTP transport).
    pub headers: Vec<(String, String)>,
    /// Handshake and timeout behavior.
    pub options: SessionOptions,
    /// Override for the framer's noise budget (for stdio transport).
    pub max_noise_lines: Option<usize>,
}

impl McpServerConfig {
    /// Create a new server config for stdio transport.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportType::Stdio,
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            url: None,
            headers: Vec::new(),
            options: SessionOptions::default(),
            max_noise_lines: None,
        }
    }

    /// Create a new server config for HTTP transport.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            transport: TransportType::Http,
            url: Some(url.into()),
            ..Self::new(name, String::new())
        }
    }

    /// Set arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Add an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set environment variables.
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Add an environment variable.
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Add an HTTP header (for HTTP transport).
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Replace all session options.
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Choose which `initialize` shape goes first.
    pub fn with_handshake_order(mut self, order: HandshakeOrder) -> Self {
        self.options.handshake_order = order;
        self
    }

    /// Send `notifications/initialized` after the handshake.
    pub fn with_notify_initialized(mut self, notify: bool) -> Self {
        self.options.notify_initialized = notify;
        self
    }

    /// Set send deadlines.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.options.timeouts = timeouts;
        self
    }

    /// Set the framer's noise budget.
    pub fn with_max_noise_lines(mut self, max_noise_lines: usize) -> Self {
        self.max_noise_lines = Some(max_noise_lines);
        self
    }

    /// Check if this is an HTTP transport config.
    pub fn is_http(&self) -> bool {
        self.transport == TransportType::Http
    }

    /// Check if this is a stdio transport config.
    pub fn is_stdio(&self) -> bool {
        self.transport == TransportType::Stdio
    }

    fn invalid(&self, reason: &str) -> McpError {
        McpError::InvalidConfig {
            server: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    /// Build the transport. Stdio servers are spawned here.
    pub fn open_transport(&self) -> Result<Box<dyn Transport>> {
        match self.transport {
            TransportType::Stdio => {
                if self.command.trim().is_empty() {
                    return Err(self.invalid("stdio transport requires a command"));
                }
                let env: HashMap<String, String> = self.env.iter().cloned().collect();
                let mut transport =
                    StdioTransport::spawn(&self.name, &self.command, &self.args, &env)?;
                if let Some(limit) = self.max_noise_lines {
                    transport = transport.with_max_noise_lines(limit);
                }
                Ok(Box::new(transport))
            }
            TransportType::Http => {
                let url = self
                    .url
                    .as_deref()
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| self.invalid("HTTP transport requires a URL"))?;
                let mut config = HttpTransportConfig::new(url);
                for (key, value) in &self.headers {
                    config = config.with_header(key, value);
                }
                Ok(Box::new(HttpTransport::connect(config)?))
            }
        }
    }

    /// Build an unstarted session for this server.
    pub fn open_session(&self) -> Result<McpSession> {
        let transport = self.open_transport()?;
        Ok(McpSession::new(&self.name, transport, self.options.clone()))
    }
}

/// A server that did not make it through bootstrap.
#[derive(Debug)]
pub struct BootstrapFailure {
    /// Server name.
    pub server: String,
    /// Why it failed.
    pub error: McpError,
}

/// Result of [`McpRegistry::bootstrap`].
#[derive(Debug)]
pub struct Bootstrap {
    /// Sessions that are ready.
    pub registry: McpRegistry,
    /// Servers that were left out, with the reason.
    pub failures: Vec<BootstrapFailure>,
}

/// Named collection of ready sessions.
///
/// The set of sessions is fixed once built; sessions themselves may still
/// refresh their tool lists.
#[derive(Default)]
pub struct McpRegistry {
    sessions: BTreeMap<String, Arc<McpSession>>,
}

impl McpRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to every configured server concurrently.
    pub async fn bootstrap(configs: Vec<McpServerConfig>) -> Bootstrap {
        let mut failures = Vec::new();
        let mut sessions = Vec::new();

        for config in unique_by_name(configs, |c| c.name.as_str(), &mut failures) {
            match config.open_session() {
                Ok(session) => sessions.push(session),
                Err(error) => {
                    tracing::warn!(server = %config.name, error = %error, "failed to open MCP transport");
                    failures.push(BootstrapFailure {
                        server: config.name,
                        error,
                    });
                }
            }
        }

        let mut boot = Self::bootstrap_sessions(sessions).await;
        failures.append(&mut boot.failures);
        boot.failures = failures;
        boot
    }

    /// Start already-built sessions concurrently.
    ///
    /// A session whose handshake or discovery fails is shut down and left
    /// out of the registry.
    pub async fn bootstrap_sessions(sessions: Vec<McpSession>) -> Bootstrap {
        let mut failures = Vec::new();
        let mut duplicates = Vec::new();
        let sessions = unique_by_name(sessions, |s| s.name(), &mut duplicates);

        for dup in &duplicates {
            tracing::warn!(server = %dup.server, "duplicate MCP server name, skipping");
        }
        failures.append(&mut duplicates);

        let started = join_all(sessions.into_iter().map(|session| async move {
            match session.start().await {
                Ok(tools) => {
                    tracing::info!(
                        server = %session.name(),
                        transport = session.transport_kind(),
                        tools = tools.len(),
                        "MCP server ready"
                    );
                    Ok(session)
                }
                Err(error) => {
                    tracing::warn!(server = %session.name(), error = %error, "MCP server bootstrap failed");
                    if let Err(e) = session.shutdown().await {
                        tracing::debug!(server = %session.name(), error = %e, "teardown after failure");
                    }
                    Err(BootstrapFailure {
                        server: session.name().to_string(),
                        error,
                    })
                }
            }
        }))
        .await;

        let mut registry = Self::new();
        for outcome in started {
            match outcome {
                Ok(session) => {
                    registry
                        .sessions
                        .insert(session.name().to_string(), Arc::new(session));
                }
                Err(failure) => failures.push(failure),
            }
        }

        Bootstrap { registry, failures }
    }

    /// Look up a session by server name.
    pub fn get(&self, name: &str) -> Option<Arc<McpSession>> {
        self.sessions.get(name).cloned()
    }

    /// Whether a server with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    /// Registered server names, sorted.
    pub fn server_names(&self) -> Vec<&str> {
        self.sessions.keys().map(String::as_str).collect()
    }

    /// Iterate over sessions in name order.
    pub fn sessions(&self) -> impl Iterator<Item = &Arc<McpSession>> {
        self.sessions.values()
    }

    /// Number of registered servers.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no server is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of every session's last discovered tools.
    pub async fn catalog(&self) -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        for (name, session) in &self.sessions {
            catalog.set_server_tools(name.clone(), session.tools().await);
        }
        catalog
    }

    /// Re-run discovery on every server, then snapshot.
    ///
    /// A server whose discovery fails keeps its previous tool list.
    pub async fn refresh_catalog(&self) -> ToolCatalog {
        let results = join_all(
            self.sessions
                .values()
                .map(|session| async move { (session.name(), session.refresh_tools().await) }),
        )
        .await;

        for (name, result) in results {
            if let Err(e) = result {
                tracing::warn!(server = %name, error = %e, "tool refresh failed, keeping previous list");
            }
        }

        self.catalog().await
    }

    /// Shut down every session.
    pub async fn shutdown_all(&self) {
        let results = join_all(
            self.sessions
                .values()
                .map(|session| async move { (session.name(), session.shutdown().await) }),
        )
        .await;

        for (name, result) in results {
            if let Err(e) = result {
                tracing::warn!(server = %name, error = %e, "error shutting down MCP server");
            }
        }
    }
}

impl std::fmt::Debug for McpRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpRegistry")
            .field("servers", &self.server_names())
            .finish()
    }
}

/// Keep the first item per name; later ones become failures.
fn unique_by_name<T>(
    items: Vec<T>,
    name: impl Fn(&T) -> &str,
    failures: &mut Vec<BootstrapFailure>,
) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(items.len());
    for item in items {
        let item_name = name(&item).to_string();
        if seen.insert(item_name.clone()) {
            kept.push(item);
        } else {
            failures.push(BootstrapFailure {
                server: item_name.clone(),
                error: McpError::DuplicateServer(item_name),
            });
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, SentLog, rpc_error, server_with_tools};
    use crate::protocol::ToolInfo;
    use std::time::Duration;

    fn mock_session(name: &str, transport: MockTransport) -> (McpSession, SentLog) {
        let log = transport.log();
        (
            McpSession::new(name, Box::new(transport), SessionOptions::default()),
            log,
        )
    }

    #[test]
    fn test_server_config_builder() {
        let config = McpServerConfig::new("sqlite", "mcp-server-sqlite")
            .with_arg("--db")
            .with_arg("/tmp/test.db")
            .with_env_var("DEBUG", "1")
            .with_notify_initialized(true)
            .with_handshake_order(HandshakeOrder::MinimalFirst)
            .with_max_noise_lines(20);

        assert_eq!(config.name, "sqlite");
        assert_eq!(config.command, "mcp-server-sqlite");
        assert_eq!(config.args, vec!["--db", "/tmp/test.db"]);
        assert_eq!(config.env, vec![("DEBUG".to_string(), "1".to_string())]);
        assert!(config.is_stdio());
        assert!(config.options.notify_initialized);
        assert_eq!(config.options.handshake_order, HandshakeOrder::MinimalFirst);
        assert_eq!(config.max_noise_lines, Some(20));
    }

    #[test]
    fn test_http_server_config_builder() {
        let config = McpServerConfig::http("remote", "https://api.example.com/mcp")
            .with_header("Authorization", "Bearer token")
            .with_timeouts(Timeouts {
                handshake: Duration::from_secs(5),
                call: Duration::from_secs(10),
            });

        assert!(config.is_http());
        assert_eq!(config.url.as_deref(), Some("https://api.example.com/mcp"));
        assert!(config.command.is_empty());
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.options.timeouts.call, Duration::from_secs(10));
    }

    #[test]
    fn test_http_without_url_is_invalid() {
        let mut config = McpServerConfig::http("remote", "");
        config.url = None;
        match config.open_transport() {
            Err(McpError::InvalidConfig { server, .. }) => assert_eq!(server, "remote"),
            _ => panic!("expected InvalidConfig"),
        }
    }

    #[test]
    fn test_stdio_without_command_is_invalid() {
        let config = McpServerConfig::new("empty", "  ");
        assert!(matches!(
            config.open_transport(),
            Err(McpError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_collects_successes_and_failures() {
        let (good, _) = mock_session("local", server_with_tools(&["ping", "orders.get"]));
        let (bad, bad_log) = mock_session(
            "remote",
            MockTransport::new(|req| Ok(rpc_error(req, -32000, "down"))),
        );

        let boot = McpRegistry::bootstrap_sessions(vec![good, bad]).await;

        assert_eq!(boot.registry.server_names(), vec!["local"]);
        assert_eq!(boot.failures.len(), 1);
        assert_eq!(boot.failures[0].server, "remote");
        assert!(matches!(
            boot.failures[0].error,
            McpError::HandshakeFailed { .. }
        ));
        assert_eq!(bad_log.shutdowns(), 1, "failed server is torn down");

        let catalog = boot.registry.catalog().await;
        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("local", "orders.get"));
    }

    #[tokio::test]
    async fn test_bootstrap_runs_concurrently() {
        let sessions: Vec<_> = (0..4)
            .map(|i| {
                mock_session(
                    &format!("s{i}"),
                    server_with_tools(&["t"]).with_delay(Duration::from_millis(100)),
                )
                .0
            })
            .collect();

        let started = std::time::Instant::now();
        let boot = McpRegistry::bootstrap_sessions(sessions).await;
        assert_eq!(boot.registry.len(), 4);
        // Each server needs two 100ms round trips; sequential startup would take 800ms.
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_duplicate_names_are_failures() {
        let (first, _) = mock_session("git", server_with_tools(&["a"]));
        let (second, second_log) = mock_session("git", server_with_tools(&["b"]));

        let boot = McpRegistry::bootstrap_sessions(vec![first, second]).await;
        assert_eq!(boot.registry.len(), 1);
        assert!(matches!(
            boot.failures[0].error,
            McpError::DuplicateServer(ref name) if name == "git"
        ));
        assert_eq!(second_log.len(), 0);
        assert!(boot.registry.catalog().await.contains("git", "a"));
    }

    #[tokio::test]
    async fn test_bootstrap_with_unspawnable_config() {
        let boot = McpRegistry::bootstrap(vec![
            McpServerConfig::new("ghost", "nonexistent-mcp-server-12345"),
            McpServerConfig::new("ghost", "also-not-spawned"),
        ])
        .await;

        assert!(boot.registry.is_empty());
        assert_eq!(boot.failures.len(), 2);
        assert!(
            boot.failures
                .iter()
                .any(|f| matches!(f.error, McpError::SpawnFailed(_)))
        );
        assert!(
            boot.failures
                .iter()
                .any(|f| matches!(f.error, McpError::DuplicateServer(_)))
        );
    }

    #[tokio::test]
    async fn test_refresh_keeps_previous_list_on_failure() {
        let mut lists = 0;
        let flaky = MockTransport::new(move |req| {
            Ok(match req["method"].as_str() {
                Some("initialize") => crate::testing::ok(req, serde_json::json!({})),
                Some("tools/list") => {
                    lists += 1;
                    if lists == 1 {
                        crate::testing::ok(req, serde_json::json!({"tools": [{"name": "v1"}]}))
                    } else {
                        rpc_error(req, -32603, "oops")
                    }
                }
                _ => serde_json::json!({}),
            })
        });
        let (session, _) = mock_session("flaky", flaky);
        let (steady, _) = mock_session("steady", server_with_tools(&["x"]));

        let boot = McpRegistry::bootstrap_sessions(vec![session, steady]).await;
        let catalog = boot.registry.refresh_catalog().await;
        let tools: Vec<&ToolInfo> = catalog.iter().map(|(_, t)| t).collect();
        assert_eq!(tools.len(), 2);
        assert!(catalog.contains("flaky", "v1"));
    }

    #[tokio::test]
    async fn test_shutdown_all() {
        let (a, a_log) = mock_session("a", server_with_tools(&[]));
        let (b, b_log) = mock_session("b", server_with_tools(&[]));
        let boot = McpRegistry::bootstrap_sessions(vec![a, b]).await;

        boot.registry.shutdown_all().await;
        assert_eq!(a_log.shutdowns(), 1);
        assert_eq!(b_log.shutdowns(), 1);
        assert!(format!("{:?}", boot.registry).contains("\"a\""));
    }
}
