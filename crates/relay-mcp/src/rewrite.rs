//! Argument rewriting applied to a plan before it is dispatched.

use std::path::{Component, Path, PathBuf};

use serde_json::{Map, Value};

/// Adjusts a plan's arguments before the tool is called.
pub trait ArgumentRewriter: Send + Sync {
    /// Return the arguments to send for `tool` on `server`.
    fn rewrite(&self, server: &str, tool: &str, arguments: Map<String, Value>) -> Map<String, Value>;
}

/// Keys holding a single path.
const PATH_KEYS: &[&str] = &["path", "source", "destination"];
/// Key holding a list of paths.
const PATH_LIST_KEY: &str = "paths";

/// Pins filesystem path arguments inside a base directory.
///
/// A leading `/` is dropped and the rest is joined onto the base. A path
/// that would still land outside the base is replaced by its file name
/// directly under the base. Normalization is lexical; nothing on disk is
/// consulted.
#[derive(Debug, Clone)]
pub struct SandboxPaths {
    base: PathBuf,
    server: Option<String>,
}

impl SandboxPaths {
    /// Sandbox path arguments for every server.
    ///
    /// A relative base is anchored at the current directory, so confined
    /// paths stay meaningful to a server running elsewhere.
    pub fn new(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        let base = std::path::absolute(base).unwrap_or_else(|_| base.to_path_buf());
        Self {
            base: normalize(&base),
            server: None,
        }
    }

    /// Only rewrite arguments bound for `server`.
    pub fn for_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// The base directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Map one path argument into the base directory.
    pub fn confine(&self, value: &str) -> String {
        let relative = Path::new(value.trim_start_matches('/'));
        let joined = normalize(&self.base.join(relative));

        let confined = if joined.starts_with(&self.base) {
            joined
        } else {
            match relative.file_name() {
                Some(name) => self.base.join(name),
                None => self.base.clone(),
            }
        };
        confined.to_string_lossy().into_owned()
    }

    fn applies_to(&self, server: &str) -> bool {
        self.server.as_deref().is_none_or(|s| s == server)
    }
}

impl ArgumentRewriter for SandboxPaths {
    fn rewrite(&self, server: &str, _tool: &str, mut arguments: Map<String, Value>) -> Map<String, Value> {
        if !self.applies_to(server) {
            return arguments;
        }

        for (key, value) in arguments.iter_mut() {
            if PATH_KEYS.contains(&key.as_str()) {
                if let Value::String(path) = value {
                    *path = self.confine(path);
                }
            } else if key == PATH_LIST_KEY
                && let Value::Array(items) = value
            {
                for item in items.iter_mut() {
                    if let Value::String(path) = item {
                        *path = self.confine(path);
                    }
                }
            }
        }

        tracing::trace!(server, base = %self.base.display(), "confined path arguments");
        arguments
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Fills in an argument the planner left out.
#[derive(Debug, Clone)]
pub struct DefaultArgument {
    key: String,
    value: Value,
    server: Option<String>,
    tool: Option<String>,
}

impl DefaultArgument {
    /// Insert `key = value` whenever `key` is missing.
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            server: None,
            tool: None,
        }
    }

    /// Only apply to `server`.
    pub fn for_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Only apply to `tool`.
    pub fn for_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }
}

impl ArgumentRewriter for DefaultArgument {
    fn rewrite(&self, server: &str, tool: &str, mut arguments: Map<String, Value>) -> Map<String, Value> {
        let server_matches = self.server.as_deref().is_none_or(|s| s == server);
        let tool_matches = self.tool.as_deref().is_none_or(|t| t == tool);
        if server_matches && tool_matches && !arguments.contains_key(&self.key) {
            arguments.insert(self.key.clone(), self.value.clone());
        }
        arguments
    }
}
