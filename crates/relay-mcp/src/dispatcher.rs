//! Executes a planner's [`Plan`] against the registry.

use std::sync::Arc;

use thiserror::Error;

use crate::error::McpError;
use crate::plan::Plan;
use crate::protocol::JsonRpcResponse;
use crate::registry::McpRegistry;
use crate::rewrite::ArgumentRewriter;

/// Why a plan could not be carried out.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The plan names a server the registry does not hold.
    #[error("unknown MCP server '{server}'")]
    UnknownServer {
        /// Requested server.
        server: String,
        /// Servers that are registered.
        available: Vec<String>,
    },

    /// The server did not advertise the requested tool.
    #[error("MCP server '{server}' has no tool '{tool}'")]
    UnknownTool {
        /// Server name.
        server: String,
        /// Requested tool.
        tool: String,
    },

    /// The call itself failed below the JSON-RPC layer, or the session was unusable.
    #[error("tool '{tool}' on '{server}' failed: {source}")]
    ToolInvocationFailed {
        /// Server name.
        server: String,
        /// Tool name.
        tool: String,
        /// Underlying failure.
        #[source]
        source: McpError,
    },
}

/// What happened to a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The tool was called; the envelope may still carry a JSON-RPC error.
    Completed {
        /// Server name.
        server: String,
        /// Tool name.
        tool: String,
        /// Full response envelope.
        response: JsonRpcResponse,
    },
    /// The plan did not name a server and tool; ask the user for more.
    ClarificationNeeded {
        /// The planner's explanation, if it gave one.
        justification: Option<String>,
    },
}

/// Routes plans to sessions.
pub struct Dispatcher {
    registry: Arc<McpRegistry>,
    rewriters: Vec<Box<dyn ArgumentRewriter>>,
    check_tools: bool,
}

impl Dispatcher {
    /// Create a dispatcher over a registry.
    pub fn new(registry: Arc<McpRegistry>) -> Self {
        Self {
            registry,
            rewriters: Vec::new(),
            check_tools: true,
        }
    }

    /// Append an argument rewriter. Rewriters run in the order added.
    pub fn with_rewriter(mut self, rewriter: impl ArgumentRewriter + 'static) -> Self {
        self.rewriters.push(Box::new(rewriter));
        self
    }

    /// Whether to reject tools the server did not advertise (on by default).
    pub fn with_tool_check(mut self, enabled: bool) -> Self {
        self.check_tools = enabled;
        self
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<McpRegistry> {
        &self.registry
    }

    /// Carry out a plan.
    pub async fn dispatch(&self, plan: Plan) -> Result<DispatchOutcome, DispatchError> {
        let Some((server, tool)) = plan.target() else {
            tracing::debug!(justification = ?plan.justification, "plan needs clarification");
            return Ok(DispatchOutcome::ClarificationNeeded {
                justification: plan.justification.clone(),
            });
        };
        let (server, tool) = (server.to_string(), tool.to_string());

        let Some(session) = self.registry.get(&server) else {
            return Err(DispatchError::UnknownServer {
                server,
                available: self
                    .registry
                    .server_names()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            });
        };

        if self.check_tools && !session.tools().await.iter().any(|t| t.name == tool) {
            return Err(DispatchError::UnknownTool { server, tool });
        }

        let arguments = self
            .rewriters
            .iter()
            .fold(plan.arguments, |args, rewriter| rewriter.rewrite(&server, &tool, args));

        tracing::info!(server = %server, tool = %tool, "dispatching tool call");

        match session.call_tool(&tool, arguments).await {
            Ok(response) => Ok(DispatchOutcome::Completed {
                server,
                tool,
                response,
            }),
            Err(source) => Err(DispatchError::ToolInvocationFailed {
                server,
                tool,
                source,
            }),
        }
    }
}
