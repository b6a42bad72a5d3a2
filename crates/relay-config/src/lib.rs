//! Configuration system for Relay.
//!
//! Provides server configuration in two formats:
//! - TOML (`[mcp]`, `[[mcp.servers]]`, `[framer]`, `[timeouts]`)
//! - JSON `mcpServers` documents, as used by most MCP hosts
//!
//! Config discovery (first match wins):
//! 1. An explicit path
//! 2. `RELAY_CONFIG`
//! 3. `./relay.toml`, then `./mcp.json`
//! 4. `<config_dir>/relay/config.toml`
//! 5. `MCP_LOCAL_URL` / `MCP_REMOTE_URL` environment fallback
//!
//! `~/` and `$VAR` placeholders in commands, arguments, env values and URLs
//! are expanded at load time.

pub mod discovery;
pub mod error;
pub mod expand;
pub mod types;

pub use discovery::{
    CONFIG_PATH_ENV, ConfigSource, DiscoveryOptions, LoadedConfig, config_dir,
    default_config_path, load_config, load_config_file, load_config_with_options,
};
pub use error::{ConfigError, Result};
pub use types::*;
