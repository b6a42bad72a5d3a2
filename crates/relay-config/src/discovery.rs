//! Config file discovery.
//!
//! Resolution order (first match wins):
//! 1. Explicit path (`--config`)
//! 2. `RELAY_CONFIG` environment variable
//! 3. `./relay.toml`
//! 4. `./mcp.json`
//! 5. `<config_dir>/relay/config.toml`
//! 6. Environment fallback (`MCP_LOCAL_URL`, `MCP_REMOTE_URL`)

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::{ConfigError, RelayConfig, Result};

/// Environment variable naming a config file.
pub const CONFIG_PATH_ENV: &str = "RELAY_CONFIG";

/// Project-local TOML config.
const PROJECT_CONFIG_FILE: &str = "relay.toml";

/// Project-local JSON `mcpServers` document.
const PROJECT_JSON_FILE: &str = "mcp.json";

/// Config filename within the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for config directory resolution.
const APP_NAME: &str = "relay";

/// Where the configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// A config file.
    File(PathBuf),
    /// No file matched; servers were built from `MCP_LOCAL_URL` / `MCP_REMOTE_URL`.
    Environment,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Environment => f.write_str("environment (MCP_LOCAL_URL / MCP_REMOTE_URL)"),
        }
    }
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The configuration, placeholders expanded and validated.
    pub config: RelayConfig,
    /// Where it came from.
    pub source: ConfigSource,
    /// Candidate paths that were checked, in order.
    pub checked: Vec<PathBuf>,
    /// Warnings generated during loading.
    pub warnings: Vec<String>,
}

/// Inputs to discovery that normally come from the process environment.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    /// Directory searched for `relay.toml` and `mcp.json`. Defaults to `.`.
    pub project_dir: Option<PathBuf>,
    /// User config directory. Defaults to `<platform config dir>/relay`.
    pub config_dir: Option<PathBuf>,
    /// Home directory for `~/` expansion. Defaults to the current user's.
    pub home: Option<PathBuf>,
    /// Variables for `$VAR` expansion and the fallback URLs. `None` reads
    /// the process environment.
    pub vars: Option<HashMap<String, String>>,
}

impl DiscoveryOptions {
    /// Options that read everything from the process environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Search a specific project directory.
    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    /// Use a specific user config directory.
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    /// Use a specific home directory.
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Resolve variables from a fixed map instead of the process environment.
    pub fn with_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.vars = Some(vars);
        self
    }

    fn lookup(&self, name: &str) -> Option<String> {
        match &self.vars {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }

    fn home_dir(&self) -> Option<PathBuf> {
        self.home.clone().or_else(dirs::home_dir)
    }

    fn user_config_path(&self) -> Option<PathBuf> {
        match &self.config_dir {
            Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
            None => default_config_path(),
        }
    }

    fn project_path(&self, file: &str) -> PathBuf {
        match &self.project_dir {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        }
    }
}

/// Discover and load configuration from the process environment.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(explicit, &DiscoveryOptions::new())
}

/// Discover and load configuration.
///
/// An explicit path, or one named by `RELAY_CONFIG`, must exist. Other
/// candidates are skipped when absent; the first one present is loaded and
/// any error in it is returned.
pub fn load_config_with_options(
    explicit: Option<&Path>,
    options: &DiscoveryOptions,
) -> Result<LoadedConfig> {
    let mut checked = Vec::new();
    let mut warnings = Vec::new();

    let required = explicit.map(Path::to_path_buf).or_else(|| {
        options
            .lookup(CONFIG_PATH_ENV)
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
    });

    if let Some(path) = required {
        checked.push(path.clone());
        let config = load_file(&path, options)?;
        return Ok(loaded(config, ConfigSource::File(path), checked, warnings));
    }

    let candidates = [
        Some(options.project_path(PROJECT_CONFIG_FILE)),
        Some(options.project_path(PROJECT_JSON_FILE)),
        options.user_config_path(),
    ];
    for path in candidates.into_iter().flatten() {
        checked.push(path.clone());
        if !path.is_file() {
            continue;
        }
        tracing::debug!(path = %path.display(), "loading config file");
        let config = load_file(&path, options)?;
        return Ok(loaded(config, ConfigSource::File(path), checked, warnings));
    }

    warnings.push(
        "No config file found; using MCP_LOCAL_URL / MCP_REMOTE_URL (default local server http://localhost:8080/mcp)"
            .to_string(),
    );
    let config = RelayConfig::from_env_fallback(|name| options.lookup(name));
    Ok(loaded(config, ConfigSource::Environment, checked, warnings))
}

/// Load a config file by path (no discovery), expanding placeholders from the
/// process environment.
///
/// Files ending in `.json` are read as `mcpServers` documents, anything else
/// as TOML.
pub fn load_config_file(path: &Path) -> Result<RelayConfig> {
    load_file(path, &DiscoveryOptions::new())
}

fn load_file(path: &Path, options: &DiscoveryOptions) -> Result<RelayConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let mut config = if is_json {
        RelayConfig::from_mcp_json(&contents)?
    } else {
        RelayConfig::from_toml(&contents)?
    };

    config.expand_placeholders(options.home_dir().as_deref(), |name| options.lookup(name));
    config.validate()?;
    Ok(config)
}

fn loaded(
    config: RelayConfig,
    source: ConfigSource,
    checked: Vec<PathBuf>,
    mut warnings: Vec<String>,
) -> LoadedConfig {
    if let Some(mcp) = &config.mcp {
        if !mcp.enabled {
            warnings.push("[mcp] enabled = false; no servers will be started".to_string());
        }
        for entry in mcp.servers.iter().filter(|s| !s.enabled) {
            warnings.push(format!("MCP server '{}' is disabled", entry.name));
        }
    }
    if config.servers().is_empty() && !matches!(source, ConfigSource::Environment) {
        warnings.push(format!("{source} defines no enabled MCP servers"));
    }

    LoadedConfig {
        config,
        source,
        checked,
        warnings,
    }
}

/// Default user config file path (`<config_dir>/relay/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// Platform config directory for relay (`~/.config/relay` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
