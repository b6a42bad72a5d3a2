//! Configuration error types.

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to parse a JSON `mcpServers` document.
    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    /// Two servers share a name.
    #[error("duplicate MCP server name '{0}'")]
    DuplicateServer(String),

    /// Stdio server without a command.
    #[error("MCP server '{server}' uses stdio transport but has no command")]
    MissingCommand { server: String },

    /// HTTP server without a URL.
    #[error("MCP server '{server}' uses http transport but has no url")]
    MissingUrl { server: String },

    /// Server entry with an empty name.
    #[error("MCP server entry #{index} has an empty name")]
    EmptyName { index: usize },
}
