//! Per-server session: handshake negotiation, discovery and invocation.
//!
//! A session owns exactly one [`Transport`] and serializes every request
//! through a single lock, so a subprocess pipe never sees two requests in
//! flight at once.
//!
//! ```text
//! Unstarted ──initialize──▶ Negotiating ──first accepted shape──▶ Ready
//!                                │
//!                                └──every shape rejected──▶ Failed
//! ```
//!
//! Servers disagree on which `initialize` params they accept, so the session
//! tries candidate shapes in turn (see [`HandshakeOrder`]). `tools/list` gets
//! the same treatment, but only an invalid-params error moves on to the next
//! shape.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::sync::Mutex;

use crate::error::{McpError, Result};
use crate::protocol::{
    CallToolParams, InitializeParams, InitializeResult, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSIONS, ServerInfo, ToolInfo,
    methods,
};
use crate::transport::{Timeouts, Transport};

/// Pause after `notifications/initialized` and between discovery attempts.
const SETTLE_PAUSE: Duration = Duration::from_millis(50);

/// Handshake progress of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No `initialize` sent yet.
    Unstarted,
    /// Trying handshake shapes.
    Negotiating,
    /// Handshake accepted; the session takes requests.
    Ready,
    /// Every handshake shape was rejected.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unstarted => "unstarted",
            Self::Negotiating => "negotiating",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Order in which `initialize` param shapes are tried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandshakeOrder {
    /// Full params first, then `{}`, then no params.
    #[default]
    StrictFirst,
    /// `{}` first, then no params, then full params.
    MinimalFirst,
}

impl FromStr for HandshakeOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "strict-first" | "strict" => Ok(Self::StrictFirst),
            "minimal-first" | "minimal" => Ok(Self::MinimalFirst),
            other => Err(format!(
                "unknown handshake order '{other}' (expected 'strict-first' or 'minimal-first')"
            )),
        }
    }
}

/// Per-server negotiation knobs.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Which `initialize` shape goes first.
    pub handshake_order: HandshakeOrder,
    /// Send `notifications/initialized` after the handshake.
    pub notify_initialized: bool,
    /// Protocol versions offered by the strict shape, newest first.
    pub protocol_versions: Vec<String>,
    /// Send deadlines.
    pub timeouts: Timeouts,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            handshake_order: HandshakeOrder::default(),
            notify_initialized: false,
            protocol_versions: PROTOCOL_VERSIONS.iter().map(|v| v.to_string()).collect(),
            timeouts: Timeouts::default(),
        }
    }
}

/// One candidate `initialize` request shape.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HandshakeShape {
    Strict(String),
    Minimal,
    Empty,
}

impl HandshakeShape {
    fn params(&self) -> Result<Option<Value>> {
        Ok(match self {
            Self::Strict(version) => Some(serde_json::to_value(InitializeParams::for_version(
                version.as_str(),
            ))?),
            Self::Minimal => Some(json!({})),
            Self::Empty => None,
        })
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Strict(_) => "strict",
            Self::Minimal => "minimal",
            Self::Empty => "empty",
        }
    }
}

/// `tools/list` params shapes, in the order they are tried.
fn discovery_shapes() -> [(&'static str, Option<Value>); 3] {
    [
        ("omitted", None),
        ("empty-object", Some(json!({}))),
        ("null", Some(Value::Null)),
    ]
}

struct SessionInner {
    transport: Box<dyn Transport>,
    state: SessionState,
    handshake: Option<InitializeResult>,
    tools: Vec<ToolInfo>,
}

/// A client session with one MCP server.
pub struct McpSession {
    name: String,
    kind: &'static str,
    options: SessionOptions,
    next_id: AtomicU64,
    inner: Mutex<SessionInner>,
}

impl McpSession {
    /// Wrap a transport. Nothing is sent until [`initialize`](Self::initialize).
    pub fn new(
        name: impl Into<String>,
        transport: Box<dyn Transport>,
        options: SessionOptions,
    ) -> Self {
        Self {
            name: name.into(),
            kind: transport.kind(),
            options,
            next_id: AtomicU64::new(1),
            inner: Mutex::new(SessionInner {
                transport,
                state: SessionState::Unstarted,
                handshake: None,
                tools: Vec::new(),
            }),
        }
    }

    /// Server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport kind (`"http"` or `"stdio"`).
    pub fn transport_kind(&self) -> &'static str {
        self.kind
    }

    /// Negotiation options.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Current handshake state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Protocol version the server agreed to, if it reported one.
    pub async fn protocol_version(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.handshake.as_ref()?.protocol_version.clone()
    }

    /// Server identification from the handshake.
    pub async fn server_info(&self) -> Option<ServerInfo> {
        let inner = self.inner.lock().await;
        inner.handshake.as_ref()?.server_info.clone()
    }

    /// Snapshot of the last discovered tool list.
    pub async fn tools(&self) -> Vec<ToolInfo> {
        self.inner.lock().await.tools.clone()
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn strict_shapes(&self) -> impl Iterator<Item = HandshakeShape> + '_ {
        self.options
            .protocol_versions
            .iter()
            .map(|v| HandshakeShape::Strict(v.clone()))
    }

    fn handshake_plan(&self) -> Vec<HandshakeShape> {
        let loose = [HandshakeShape::Minimal, HandshakeShape::Empty];
        match self.options.handshake_order {
            HandshakeOrder::StrictFirst => self.strict_shapes().chain(loose).collect(),
            HandshakeOrder::MinimalFirst => loose.into_iter().chain(self.strict_shapes()).collect(),
        }
    }

    async fn round_trip(
        &self,
        inner: &mut SessionInner,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse> {
        let request = JsonRpcRequest::new(self.next_request_id(), method, params);
        let message = serde_json::to_value(&request)?;
        let reply = inner.transport.send(&message, timeout).await?;
        JsonRpcResponse::from_value(reply)
            .map_err(|e| McpError::protocol(format!("malformed {method} response: {e}")))
    }

    fn require_ready(&self, inner: &SessionInner) -> Result<()> {
        if inner.state == SessionState::Ready {
            Ok(())
        } else {
            Err(McpError::NotReady {
                server: self.name.clone(),
                state: inner.state,
            })
        }
    }

    /// Negotiate the handshake.
    ///
    /// Tries each candidate shape until one comes back without an `error`.
    /// Transport faults also move on to the next shape. On a session that is
    /// already `Ready` this returns the recorded result without sending.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let mut inner = self.inner.lock().await;

        match inner.state {
            SessionState::Ready => return Ok(inner.handshake.clone().unwrap_or_default()),
            SessionState::Failed => {
                return Err(McpError::NotReady {
                    server: self.name.clone(),
                    state: SessionState::Failed,
                });
            }
            SessionState::Unstarted | SessionState::Negotiating => {}
        }

        inner.state = SessionState::Negotiating;
        let mut attempts = 0usize;
        let mut last_error = None;

        for shape in self.handshake_plan() {
            attempts += 1;
            let outcome = match shape.params() {
                Ok(params) => self
                    .round_trip(&mut inner, methods::INITIALIZE, params, self.options.timeouts.handshake)
                    .await
                    .and_then(|response| response.into_result().map_err(McpError::from)),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(result) => {
                    let parsed = InitializeResult::from_result(&result);
                    tracing::info!(
                        server = %self.name,
                        attempt = attempts,
                        shape = shape.label(),
                        protocol_version = ?parsed.protocol_version,
                        "MCP handshake accepted"
                    );
                    inner.state = SessionState::Ready;
                    inner.handshake = Some(parsed.clone());
                    return Ok(parsed);
                }
                Err(e) => {
                    tracing::debug!(
                        server = %self.name,
                        attempt = attempts,
                        shape = shape.label(),
                        error = %e,
                        "MCP handshake shape rejected"
                    );
                    last_error = Some(e);
                }
            }
        }

        inner.state = SessionState::Failed;
        let source = last_error
            .unwrap_or_else(|| McpError::protocol("no handshake shapes were configured"));
        tracing::warn!(server = %self.name, attempts, error = %source, "MCP handshake failed");

        Err(McpError::HandshakeFailed {
            server: self.name.clone(),
            attempts,
            source: Box::new(source),
        })
    }

    /// Send `notifications/initialized`.
    ///
    /// Send failures are logged and swallowed. A short pause follows the
    /// write so the server can settle before the next request.
    pub async fn notify_initialized(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.require_ready(&inner)?;

        let notification = serde_json::to_value(JsonRpcNotification::new(methods::INITIALIZED, None))?;
        match inner
            .transport
            .send(&notification, self.options.timeouts.handshake)
            .await
        {
            Ok(_) => tracing::debug!(server = %self.name, "sent initialized notification"),
            Err(e) => tracing::warn!(
                server = %self.name,
                error = %e,
                "initialized notification failed, continuing"
            ),
        }

        tokio::time::sleep(SETTLE_PAUSE).await;
        Ok(())
    }

    /// Discover tools, replacing the stored catalog on success.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let mut inner = self.inner.lock().await;
        self.require_ready(&inner)?;

        let shapes = discovery_shapes();
        let total = shapes.len();
        let mut last_error = None;

        for (index, (shape, params)) in shapes.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(SETTLE_PAUSE).await;
            }

            let response = self
                .round_trip(&mut inner, methods::TOOLS_LIST, params, self.options.timeouts.handshake)
                .await?;

            match response.into_result() {
                Ok(result) => {
                    let tools = parse_tool_list(result)?;
                    tracing::info!(
                        server = %self.name,
                        shape,
                        tool_count = tools.len(),
                        "discovered MCP tools"
                    );
                    inner.tools = tools.clone();
                    return Ok(tools);
                }
                Err(error) if error.code == JsonRpcError::INVALID_PARAMS && index + 1 < total => {
                    tracing::debug!(
                        server = %self.name,
                        shape,
                        message = %error.message,
                        "tools/list rejected params shape, trying next"
                    );
                    last_error = Some(McpError::from(error));
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(last_error.unwrap_or_else(|| McpError::protocol("tools/list was never attempted")))
    }

    /// Same as [`list_tools`](Self::list_tools).
    pub async fn refresh_tools(&self) -> Result<Vec<ToolInfo>> {
        self.list_tools().await
    }

    /// Invoke a tool and return the whole response envelope.
    ///
    /// A JSON-RPC `error` in the reply is not turned into `Err`; callers see
    /// both layers. Transport faults are returned as-is and never retried.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<JsonRpcResponse> {
        let mut inner = self.inner.lock().await;
        self.require_ready(&inner)?;

        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;

        tracing::debug!(server = %self.name, tool = %name, "calling MCP tool");

        let response = self
            .round_trip(&mut inner, methods::TOOLS_CALL, Some(params), self.options.timeouts.call)
            .await
            .inspect_err(|e| {
                tracing::warn!(server = %self.name, tool = %name, error = %e, "MCP tool call failed");
            })?;

        if let Some(error) = &response.error {
            tracing::debug!(
                server = %self.name,
                tool = %name,
                code = error.code,
                "MCP tool call returned an error response"
            );
        }

        Ok(response)
    }

    /// Handshake, optional notification and discovery in one go.
    pub async fn start(&self) -> Result<Vec<ToolInfo>> {
        self.initialize().await?;
        if self.options.notify_initialized {
            self.notify_initialized().await?;
        }
        self.list_tools().await
    }

    /// Tear down the transport. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        tracing::info!(server = %self.name, "shutting down MCP session");
        inner.transport.shutdown().await
    }
}

fn parse_tool_list(result: Value) -> Result<Vec<ToolInfo>> {
    if result.is_null() {
        return Ok(Vec::new());
    }
    let list: ListToolsResult = serde_json::from_value(result)
        .map_err(|e| McpError::protocol(format!("malformed tools/list result: {e}")))?;
    Ok(list.tools)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use super::*;
    use crate::testing::{MockTransport, ok, rpc_error, server_with_tools};
    use crate::transport::StdioTransport;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex};

    fn session(transport: MockTransport) -> McpSession {
        McpSession::new("test", Box::new(transport), SessionOptions::default())
    }

    fn shape_of(request: &Value) -> &'static str {
        match request.get("params") {
            None => "empty",
            Some(p) if p.get("protocolVersion").is_some() => "strict",
            Some(p) if p == &json!({}) => "minimal",
            Some(_) => "other",
        }
    }

    #[test]
    fn test_handshake_order_parsing() {
        assert_eq!(
            "strict-first".parse::<HandshakeOrder>(),
            Ok(HandshakeOrder::StrictFirst)
        );
        assert_eq!(
            "Minimal_First".parse::<HandshakeOrder>(),
            Ok(HandshakeOrder::MinimalFirst)
        );
        assert!("sideways".parse::<HandshakeOrder>().is_err());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Ready.to_string(), "ready");
        assert_eq!(SessionState::Failed.to_string(), "failed");
    }

    #[tokio::test]
    async fn test_falls_back_to_empty_shape() {
        let transport = MockTransport::new(|req| {
            Ok(match shape_of(req) {
                "empty" => ok(req, json!({"serverInfo": {"name": "picky"}})),
                _ => rpc_error(req, -32602, "unexpected params"),
            })
        });
        let log = transport.log();
        let session = session(transport);

        let result = session.initialize().await.unwrap();
        assert_eq!(result.protocol_version, None);
        assert_eq!(session.state().await, SessionState::Ready);
        assert_eq!(session.protocol_version().await, None);
        assert_eq!(session.server_info().await.unwrap().name, "picky");

        let shapes: Vec<_> = log.messages().iter().map(shape_of).collect();
        assert_eq!(shapes, vec!["strict", "strict", "strict", "minimal", "empty"]);
    }

    #[tokio::test]
    async fn test_strict_records_negotiated_version() {
        let transport = MockTransport::new(|req| {
            Ok(match shape_of(req) {
                "strict" if req["params"]["protocolVersion"] == "2025-06-18" => ok(
                    req,
                    json!({"protocolVersion": "2025-03-26", "capabilities": {"tools": {}}}),
                ),
                _ => rpc_error(req, -32600, "strict only"),
            })
        });
        let log = transport.log();
        let session = session(transport);

        session.initialize().await.unwrap();
        assert_eq!(session.protocol_version().await.as_deref(), Some("2025-03-26"));
        assert_eq!(log.len(), 1);

        let params = &log.messages()[0]["params"];
        assert_eq!(params["clientInfo"]["name"], "relay");
        assert!(params["capabilities"]["tools"].is_object());
        assert!(params["capabilities"]["resources"].is_object());
        assert!(params["capabilities"]["prompts"].is_object());
    }

    #[tokio::test]
    async fn test_strict_tries_older_versions() {
        let transport = MockTransport::new(|req| {
            Ok(if req["params"]["protocolVersion"] == "2024-11-05" {
                ok(req, json!({"protocolVersion": "2024-11-05"}))
            } else {
                rpc_error(req, -32602, "unsupported version")
            })
        });
        let session = session(transport);
        session.initialize().await.unwrap();
        assert_eq!(session.protocol_version().await.as_deref(), Some("2024-11-05"));
    }

    #[tokio::test]
    async fn test_minimal_first_order() {
        let transport = MockTransport::new(|req| Ok(rpc_error(req, -32600, "no")));
        let log = transport.log();
        let options = SessionOptions {
            handshake_order: HandshakeOrder::MinimalFirst,
            protocol_versions: vec!["2025-06-18".to_string()],
            ..Default::default()
        };
        let session = McpSession::new("ordered", Box::new(transport), options);

        let _ = session.initialize().await;
        let shapes: Vec<_> = log.messages().iter().map(shape_of).collect();
        assert_eq!(shapes, vec!["minimal", "empty", "strict"]);
    }

    #[tokio::test]
    async fn test_handshake_exhaustion() {
        let transport = MockTransport::new(|req| Ok(rpc_error(req, -32000, "go away")));
        let log = transport.log();
        let session = session(transport);

        let err = session.initialize().await.unwrap_err();
        match &err {
            McpError::HandshakeFailed {
                server,
                attempts,
                source,
            } => {
                assert_eq!(server, "test");
                assert_eq!(*attempts, PROTOCOL_VERSIONS.len() + 2);
                assert!(matches!(**source, McpError::ServerError { code: -32000, .. }));
            }
            other => panic!("expected HandshakeFailed, got {other:?}"),
        }
        assert_eq!(session.state().await, SessionState::Failed);

        let sent = log.len();
        assert!(matches!(
            session.list_tools().await,
            Err(McpError::NotReady {
                state: SessionState::Failed,
                ..
            })
        ));
        assert!(matches!(
            session.initialize().await,
            Err(McpError::NotReady { .. })
        ));
        assert_eq!(log.len(), sent, "no request after the handshake failed");
    }

    #[tokio::test]
    async fn test_transport_faults_advance_handshake() {
        let mut calls = 0;
        let transport = MockTransport::new(move |req| {
            calls += 1;
            if calls < 3 {
                Err(McpError::ConnectionClosed)
            } else {
                Ok(ok(req, json!({})))
            }
        });
        let session = session(transport);
        session.initialize().await.unwrap();
        assert_eq!(session.state().await, SessionState::Ready);
    }

    #[tokio::test]
    async fn test_initialize_twice_does_not_resend() {
        let transport = server_with_tools(&[]);
        let log = transport.log();
        let session = session(transport);
        session.initialize().await.unwrap();
        session.initialize().await.unwrap();
        assert_eq!(log.with_method("initialize").len(), 1);
    }

    #[tokio::test]
    async fn test_calls_before_handshake_are_rejected() {
        let transport = server_with_tools(&["echo"]);
        let log = transport.log();
        let session = session(transport);

        assert!(matches!(
            session.list_tools().await,
            Err(McpError::NotReady {
                state: SessionState::Unstarted,
                ..
            })
        ));
        assert!(matches!(
            session.call_tool("echo", Map::new()).await,
            Err(McpError::NotReady { .. })
        ));
        assert!(matches!(
            session.notify_initialized().await,
            Err(McpError::NotReady { .. })
        ));
        assert_eq!(log.len(), 0);
    }

    #[tokio::test]
    async fn test_discovery_retries_on_invalid_params() {
        let transport = MockTransport::new(|req| {
            Ok(match (req["method"].as_str(), req.get("params")) {
                (Some("initialize"), _) => ok(req, json!({})),
                (Some("tools/list"), None) => rpc_error(req, -32602, "params required"),
                (Some("tools/list"), Some(_)) => ok(
                    req,
                    json!({"tools": [{"name": "b"}, {"name": "a", "description": "first"}]}),
                ),
                _ => json!({}),
            })
        });
        let log = transport.log();
        let session = session(transport);
        session.initialize().await.unwrap();

        let tools = session.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(session.tools().await, tools);

        let lists = log.with_method("tools/list");
        assert_eq!(lists.len(), 2);
        assert!(lists[0].get("params").is_none());
        assert_eq!(lists[1]["params"], json!({}));
    }

    #[tokio::test]
    async fn test_discovery_tries_null_params_last() {
        let transport = MockTransport::new(|req| {
            Ok(match (req["method"].as_str(), req.get("params")) {
                (Some("initialize"), _) => ok(req, json!({})),
                (Some("tools/list"), Some(Value::Null)) => ok(req, json!({"tools": []})),
                (Some("tools/list"), _) => rpc_error(req, -32602, "bad params"),
                _ => json!({}),
            })
        });
        let log = transport.log();
        let session = session(transport);
        session.initialize().await.unwrap();

        assert!(session.list_tools().await.unwrap().is_empty());
        let lists = log.with_method("tools/list");
        assert_eq!(lists.len(), 3);
        assert_eq!(lists[2]["params"], Value::Null);
        assert!(lists[2].as_object().unwrap().contains_key("params"));
    }

    #[tokio::test]
    async fn test_discovery_stops_on_other_errors() {
        let transport = MockTransport::new(|req| {
            Ok(match req["method"].as_str() {
                Some("initialize") => ok(req, json!({})),
                _ => rpc_error(req, -32000, "backend down"),
            })
        });
        let log = transport.log();
        let session = session(transport);
        session.initialize().await.unwrap();

        let err = session.list_tools().await.unwrap_err();
        assert_eq!(err.server_code(), Some(-32000));
        assert_eq!(log.with_method("tools/list").len(), 1);
    }

    #[tokio::test]
    async fn test_discovery_exhausted_keeps_old_catalog() {
        let mut lists = 0;
        let transport = MockTransport::new(move |req| {
            Ok(match req["method"].as_str() {
                Some("initialize") => ok(req, json!({})),
                Some("tools/list") => {
                    lists += 1;
                    if lists == 1 {
                        ok(req, json!({"tools": [{"name": "keep"}]}))
                    } else {
                        rpc_error(req, -32602, "never happy")
                    }
                }
                _ => json!({}),
            })
        });
        let session = session(transport);
        session.initialize().await.unwrap();
        session.list_tools().await.unwrap();

        let err = session.refresh_tools().await.unwrap_err();
        assert_eq!(err.server_code(), Some(-32602));
        assert_eq!(session.tools().await[0].name, "keep");
    }

    #[tokio::test]
    async fn test_notification_failure_is_swallowed() {
        let transport = MockTransport::new(|req| {
            if req.get("id").is_none() {
                return Err(McpError::transport("broken pipe"));
            }
            Ok(ok(req, json!({"tools": []})))
        });
        let log = transport.log();
        let options = SessionOptions {
            notify_initialized: true,
            ..Default::default()
        };
        let session = McpSession::new("notify", Box::new(transport), options);

        session.start().await.unwrap();

        let methods: Vec<_> = log
            .messages()
            .iter()
            .map(|m| m["method"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(methods, vec!["initialize", "notifications/initialized", "tools/list"]);
        assert!(log.with_method("notifications/initialized")[0].get("id").is_none());
    }

    #[tokio::test]
    async fn test_start_skips_notification_by_default() {
        let transport = server_with_tools(&["echo"]);
        let log = transport.log();
        let session = session(transport);
        let tools = session.start().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert!(log.with_method("notifications/initialized").is_empty());
    }

    #[tokio::test]
    async fn test_call_tool_returns_envelope() {
        let transport = MockTransport::new(|req| {
            Ok(match req["method"].as_str() {
                Some("initialize") => ok(req, json!({})),
                Some("tools/call") if req["params"]["name"] == "fail" => {
                    rpc_error(req, -32001, "tool exploded")
                }
                Some("tools/call") => ok(req, json!({"ok": false, "reason": "declined"})),
                _ => json!({}),
            })
        });
        let log = transport.log();
        let session = session(transport);
        session.initialize().await.unwrap();

        let mut args = Map::new();
        args.insert("order".to_string(), json!(42));
        let response = session.call_tool("pay", args).await.unwrap();
        assert!(!response.is_error());
        assert_eq!(response.result.unwrap()["ok"], false);

        let response = session.call_tool("fail", Map::new()).await.unwrap();
        assert_eq!(response.error_code(), Some(-32001));

        let calls = log.with_method("tools/call");
        assert_eq!(calls[0]["params"], json!({"name": "pay", "arguments": {"order": 42}}));
        assert_ne!(calls[0]["id"], calls[1]["id"]);
    }

    #[tokio::test]
    async fn test_request_ids_are_fresh() {
        let transport = server_with_tools(&["a"]);
        let log = transport.log();
        let session = session(transport);
        session.start().await.unwrap();
        session.call_tool("a", Map::new()).await.unwrap();
        session.call_tool("a", Map::new()).await.unwrap();

        let ids: Vec<u64> = log
            .messages()
            .iter()
            .filter_map(|m| m["id"].as_u64())
            .collect();
        let mut sorted = ids.clone();
        sorted.dedup();
        assert_eq!(ids.len(), sorted.len());
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_timeout_keeps_session_ready() {
        let options = SessionOptions {
            timeouts: Timeouts {
                handshake: Duration::from_secs(5),
                call: Duration::from_millis(20),
            },
            ..Default::default()
        };
        let transport = server_with_tools(&["slow"]).with_delay(Duration::from_millis(50));
        let log = transport.log();
        let session = McpSession::new("slow", Box::new(transport), options);
        session.initialize().await.unwrap();

        let err = session.call_tool("slow", Map::new()).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout(_)));
        assert_eq!(session.state().await, SessionState::Ready);
        assert_eq!(log.with_method("tools/call").len(), 1, "tool calls are not retried");

        // Discovery uses the longer handshake budget and still works.
        assert!(session.list_tools().await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_serialized_on_mock() {
        let in_flight = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let overlap = Arc::new(std::sync::atomic::AtomicBool::new(false));

        struct Exclusive {
            in_flight: Arc<std::sync::atomic::AtomicBool>,
            overlap: Arc<std::sync::atomic::AtomicBool>,
        }

        #[async_trait::async_trait]
        impl Transport for Exclusive {
            async fn send(&mut self, message: &Value, _timeout: Duration) -> Result<Value> {
                if self.in_flight.swap(true, Ordering::SeqCst) {
                    self.overlap.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.in_flight.store(false, Ordering::SeqCst);
                Ok(ok(message, json!({})))
            }

            fn kind(&self) -> &'static str {
                "exclusive"
            }
        }

        let session = Arc::new(McpSession::new(
            "exclusive",
            Box::new(Exclusive {
                in_flight: in_flight.clone(),
                overlap: overlap.clone(),
            }),
            SessionOptions::default(),
        ));
        session.initialize().await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let session = session.clone();
                tokio::spawn(async move { session.call_tool(&format!("t{i}"), Map::new()).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(!overlap.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_concurrent_calls_do_not_interleave_on_pipe() {
        let (client_out, server_in) = duplex(64 * 1024);
        let (mut server_out, client_in) = duplex(64 * 1024);
        let events = Arc::new(StdMutex::new(Vec::<String>::new()));

        // Log each request the moment it lands on the pipe; answer later.
        let (queue_tx, mut queue_rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
        let arrivals = events.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_in).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                if request["method"] == "tools/call" {
                    arrivals
                        .lock()
                        .unwrap()
                        .push(format!("write:{}", request["params"]["name"].as_str().unwrap()));
                }
                if queue_tx.send(request).is_err() {
                    break;
                }
            }
        });
        let replies = events.clone();
        tokio::spawn(async move {
            while let Some(request) = queue_rx.recv().await {
                if request.get("id").is_none() {
                    continue;
                }
                if request["method"] == "tools/call" {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    replies
                        .lock()
                        .unwrap()
                        .push(format!("read:{}", request["params"]["name"].as_str().unwrap()));
                }
                let mut line = serde_json::to_string(&ok(&request, json!({}))).unwrap();
                line.push('\n');
                server_out.write_all(line.as_bytes()).await.unwrap();
            }
        });

        let transport = StdioTransport::from_pipes("pipe", BufReader::new(client_in), client_out);
        let session = McpSession::new("pipe", Box::new(transport), SessionOptions::default());
        session.initialize().await.unwrap();

        let (a, b) = tokio::join!(
            session.call_tool("first", Map::new()),
            session.call_tool("second", Map::new())
        );
        a.unwrap();
        b.unwrap();

        let events = events.lock().unwrap().clone();
        assert_eq!(events.len(), 4);
        for pair in events.chunks(2) {
            let written = pair[0].strip_prefix("write:").unwrap();
            assert_eq!(pair[1], format!("read:{written}"), "log: {events:?}");
        }
    }

    #[tokio::test]
    async fn test_shutdown_reaches_transport() {
        let transport = server_with_tools(&[]);
        let log = transport.log();
        let session = session(transport);
        session.shutdown().await.unwrap();
        assert_eq!(log.shutdowns(), 1);
    }
}
