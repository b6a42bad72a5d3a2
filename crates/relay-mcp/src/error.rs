//! Error types for MCP operations.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::JsonRpcError;
use crate::session::SessionState;

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Error type for MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to spawn the MCP server process.
    #[error("failed to spawn MCP server: {0}")]
    SpawnFailed(String),

    /// Network or pipe level fault.
    #[error("transport error: {0}")]
    Transport(String),

    /// The HTTP endpoint answered with a non-2xx status.
    #[error("HTTP error {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, as far as it could be read.
        body: String,
    },

    /// The child process is gone; nothing was written.
    #[error("MCP server process exited{}", exit_suffix(.code))]
    ProcessExited {
        /// Exit code, if the platform reported one.
        code: Option<i32>,
    },

    /// The server closed its output stream.
    #[error("connection closed")]
    ConnectionClosed,

    /// Too many non-protocol lines before a JSON message arrived.
    #[error("no JSON message after skipping {skipped} non-protocol lines")]
    FramingTimeout {
        /// Number of lines discarded before giving up.
        skipped: usize,
    },

    /// The send deadline expired.
    #[error("timeout after {0:?} waiting for response")]
    Timeout(Duration),

    /// Malformed or unexpected response shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server returned a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    ServerError {
        /// Error code from the server.
        code: i64,
        /// Error message from the server.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// Every candidate `initialize` request was rejected.
    #[error("handshake with '{server}' failed after {attempts} attempts: {source}")]
    HandshakeFailed {
        /// Server name.
        server: String,
        /// Number of `initialize` requests sent.
        attempts: usize,
        /// The last underlying failure.
        #[source]
        source: Box<McpError>,
    },

    /// Two server configurations share a name.
    #[error("duplicate MCP server name '{0}'")]
    DuplicateServer(String),

    /// Server configuration is unusable.
    #[error("invalid configuration for '{server}': {reason}")]
    InvalidConfig {
        /// Server name.
        server: String,
        /// What is wrong.
        reason: String,
    },

    /// Operation requires a session that finished its handshake.
    #[error("session '{server}' is not ready (state: {state})")]
    NotReady {
        /// Server name.
        server: String,
        /// Current handshake state.
        state: SessionState,
    },
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with code {code}"),
        None => String::new(),
    }
}

impl McpError {
    /// Create a spawn failed error.
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a server error from an error response.
    pub fn server_error(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }

    /// Whether the fault happened below the JSON-RPC layer.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailed(_)
                | Self::Transport(_)
                | Self::HttpStatus { .. }
                | Self::ProcessExited { .. }
                | Self::ConnectionClosed
                | Self::FramingTimeout { .. }
                | Self::Timeout(_)
                | Self::Io(_)
        )
    }

    /// The JSON-RPC error code, when the server sent one.
    pub fn server_code(&self) -> Option<i64> {
        match self {
            Self::ServerError { code, .. } => Some(*code),
            Self::HandshakeFailed { source, .. } => source.server_code(),
            _ => None,
        }
    }
}

impl From<JsonRpcError> for McpError {
    fn from(error: JsonRpcError) -> Self {
        Self::ServerError {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = McpError::spawn_failed("command not found");
        assert!(err.to_string().contains("spawn"));
        assert!(err.to_string().contains("command not found"));

        let err = McpError::server_error(-32600, "Invalid Request", None);
        assert!(err.to_string().contains("-32600"));
        assert!(err.to_string().contains("Invalid Request"));

        let err = McpError::ProcessExited { code: Some(1) };
        assert_eq!(err.to_string(), "MCP server process exited with code 1");
        let err = McpError::ProcessExited { code: None };
        assert_eq!(err.to_string(), "MCP server process exited");
    }

    #[test]
    fn test_handshake_failed_keeps_cause() {
        let err = McpError::HandshakeFailed {
            server: "git".to_string(),
            attempts: 3,
            source: Box::new(McpError::server_error(-32602, "bad params", None)),
        };
        assert!(err.to_string().contains("'git'"));
        assert!(err.to_string().contains("bad params"));
        assert_eq!(err.server_code(), Some(-32602));
        assert!(!err.is_transport_fault());
    }

    #[test]
    fn test_transport_fault_classification() {
        assert!(McpError::ConnectionClosed.is_transport_fault());
        assert!(McpError::Timeout(Duration::from_secs(1)).is_transport_fault());
        assert!(McpError::FramingTimeout { skipped: 500 }.is_transport_fault());
        assert!(!McpError::protocol("bad shape").is_transport_fault());
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let mcp_err: McpError = json_err.into();
        assert!(matches!(mcp_err, McpError::Json(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let mcp_err: McpError = io_err.into();
        assert!(matches!(mcp_err, McpError::Io(_)));
    }
}
