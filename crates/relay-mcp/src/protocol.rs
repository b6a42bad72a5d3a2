//! Wire types: JSON-RPC 2.0 envelopes and the MCP payloads Relay speaks.
//!
//! Messages travel either as HTTP POST bodies or as single lines of JSON on a
//! child process' standard streams. Payloads that servers are known to vary on
//! (initialize results, tool schemas) are parsed leniently.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Value of every envelope's `jsonrpc` field.
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol versions offered during a strict handshake, newest first.
pub const PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Method names used by the client.
pub mod methods {
    /// Handshake request.
    pub const INITIALIZE: &str = "initialize";
    /// Post-handshake notification.
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Tool discovery request.
    pub const TOOLS_LIST: &str = "tools/list";
    /// Tool invocation request.
    pub const TOOLS_CALL: &str = "tools/call";
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelopes
// ─────────────────────────────────────────────────────────────────────────────

/// An outgoing call that expects a reply.
///
/// `params: None` omits the key entirely; `Some(Value::Null)` sends an
/// explicit `"params": null`. Servers disagree on which of those they accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// Matches the reply to this request.
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Build a `"2.0"` request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A one-way message: no `id`, and the peer never answers it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Build a `"2.0"` notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC response envelope.
///
/// Kept whole for tool calls so callers can tell a JSON-RPC `error` apart from
/// a result that itself reports failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    /// Request ID this response is for. Absent for HTTP bodies that carried no JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Present when the call succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present when the server rejected the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

fn default_jsonrpc() -> String {
    JSONRPC_VERSION.to_string()
}

impl JsonRpcResponse {
    /// Parse a raw message into a response envelope.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// Whether the server answered with an `error` member.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The JSON-RPC error code, if any.
    pub fn error_code(&self) -> Option<i64> {
        self.error.as_ref().map(|e| e.code)
    }

    /// Split into the result or the server's error. A missing result is `null`.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or_default()),
        }
    }

    /// Interpret the result as a `tools/call` payload, if it has that shape.
    pub fn call_result(&self) -> Option<CallToolResult> {
        self.result
            .as_ref()
            .and_then(|r| serde_json::from_value(r.clone()).ok())
    }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    /// Server-specific detail, uninterpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Codes reserved by JSON-RPC 2.0.
impl JsonRpcError {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Discovery falls through to the next params shape on this code.
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Read the `id` of a raw message, if it is a number.
pub(crate) fn message_id(message: &Value) -> Option<u64> {
    message.get("id").and_then(Value::as_u64)
}

/// Whether a raw message is a server-originated notification or request.
pub(crate) fn is_server_message(message: &Value) -> bool {
    message.get("method").is_some()
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Capabilities declared by the strict handshake: tools, resources and prompts,
/// each as an empty object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCapabilities {
    pub tools: Value,
    pub resources: Value,
    pub prompts: Value,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            tools: Value::Object(Map::new()),
            resources: Value::Object(Map::new()),
            prompts: Value::Object(Map::new()),
        }
    }
}

/// How Relay introduces itself in `clientInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "relay".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Parameters for the strict initialize request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

impl InitializeParams {
    /// Strict parameters offering the given protocol version.
    pub fn for_version(protocol_version: impl Into<String>) -> Self {
        Self {
            protocol_version: protocol_version.into(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo::default(),
        }
    }
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self::for_version(PROTOCOL_VERSIONS[0])
    }
}

/// `serverInfo` from an initialize result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    /// Empty when the server leaves it out.
    #[serde(default)]
    pub version: String,
}

/// The parts of an initialize result the client keeps.
///
/// Every field is optional: servers answering a minimal or empty handshake
/// often return little more than `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the server agreed to.
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Server capabilities, uninterpreted.
    #[serde(default)]
    pub capabilities: Option<Value>,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

impl InitializeResult {
    /// Extract what can be understood from an arbitrary result value.
    pub fn from_result(result: &Value) -> Self {
        serde_json::from_value(result.clone()).unwrap_or_else(|_| Self {
            protocol_version: result
                .get("protocolVersion")
                .and_then(Value::as_str)
                .map(str::to_string),
            ..Default::default()
        })
    }
}

/// One entry of a `tools/list` answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    /// Unique within its server.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input parameters, passed through as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Body of a `tools/list` result. A missing `tools` key means none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
}

/// `tools/call` params. Arguments are sent exactly as the plan gave them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// A block of `tools/call` output, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    /// Base64 payload plus its MIME type.
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
}

/// A `tools/call` result body.
///
/// `isError: true` is the tool reporting failure inside a successful
/// JSON-RPC exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    /// All text blocks joined by newlines; `None` when there are none.
    pub fn text(&self) -> Option<String> {
        let mut texts = self.content.iter().filter_map(|block| match block {
            ToolContent::Text { text } => Some(text.as_str()),
            _ => None,
        });
        let first = texts.next()?;
        Some(texts.fold(first.to_string(), |mut joined, text| {
            joined.push('\n');
            joined.push_str(text);
            joined
        }))
    }

    /// `isError` with an absent flag read as `false`.
    pub fn is_error(&self) -> bool {
        self.is_error == Some(true)
    }
}
