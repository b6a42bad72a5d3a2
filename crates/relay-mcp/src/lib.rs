//! Multi-server MCP (Model Context Protocol) client core for Relay.
//!
//! This crate connects to any number of MCP tool servers, negotiates a
//! handshake with each, aggregates their tools into one catalog for a
//! planner, and executes the planner's `{server, tool, arguments}` decisions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Dispatcher                                                 │
//! │  - Plan → session lookup → argument rewriters → tools/call  │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpRegistry                                                │
//! │  - Concurrent bootstrap, one McpSession per server          │
//! │  - Aggregated ToolCatalog                                   │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpSession                                                 │
//! │  - Handshake shape negotiation, tools/list, tools/call      │
//! │  - One request in flight at a time                          │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Transport                                                  │
//! │  - HttpTransport: one POST per message                      │
//! │  - StdioTransport: line-delimited JSON + MessageFramer      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use relay_mcp::{Dispatcher, DispatchOutcome, McpRegistry, McpServerConfig, Plan};
//!
//! let boot = McpRegistry::bootstrap(vec![
//!     McpServerConfig::new("fs", "npx")
//!         .with_arg("-y")
//!         .with_arg("@modelcontextprotocol/server-filesystem")
//!         .with_arg("/srv/work"),
//!     McpServerConfig::http("local", "http://localhost:8080/mcp"),
//! ])
//! .await;
//!
//! let registry = Arc::new(boot.registry);
//! let prompt_block = registry.catalog().await.render_for_planner();
//!
//! let plan = Plan::parse_lenient(&planner_output)?;
//! match Dispatcher::new(registry.clone()).dispatch(plan).await? {
//!     DispatchOutcome::Completed { response, .. } => println!("{response:?}"),
//!     DispatchOutcome::ClarificationNeeded { justification } => println!("{justification:?}"),
//! }
//!
//! registry.shutdown_all().await;
//! ```
//!
//! # Wire format
//!
//! Stdio servers exchange one JSON-RPC message per line. Anything else a
//! server prints on stdout (banners, logs) is skipped by the framer, up to a
//! bounded number of lines per message.
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"initialize","params":{...}}\n
//! ```

pub mod catalog;
pub mod dispatcher;
pub mod error;
pub mod framer;
pub mod plan;
pub mod protocol;
pub mod registry;
pub mod rewrite;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types
pub use catalog::ToolCatalog;
pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
pub use error::{McpError, Result};
pub use framer::{DEFAULT_MAX_NOISE_LINES, MessageFramer};
pub use plan::{Plan, PlanParseError};
pub use protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSIONS, ServerInfo,
    ToolContent, ToolInfo,
};
pub use registry::{Bootstrap, BootstrapFailure, McpRegistry, McpServerConfig, TransportType};
pub use rewrite::{ArgumentRewriter, DefaultArgument, SandboxPaths};
pub use session::{HandshakeOrder, McpSession, SessionOptions, SessionState};
pub use transport::{HttpTransport, HttpTransportConfig, StdioTransport, Timeouts, Transport};
