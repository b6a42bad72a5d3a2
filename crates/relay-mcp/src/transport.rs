//! Transport layer for MCP communication.
//!
//! Two carriers implement [`Transport`]: [`HttpTransport`] POSTs each message
//! to a fixed endpoint, and [`StdioTransport`] writes line-delimited JSON to a
//! child process and reads replies back through a [`MessageFramer`]. Framing,
//! deadlines and process lifetime stay inside each carrier.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

use crate::error::{McpError, Result};
use crate::framer::MessageFramer;
use crate::protocol::{is_server_message, message_id};

/// How long a killed child gets to be reaped before teardown moves on.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Per-send deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Budget for `initialize`, notifications and `tools/list`.
    pub handshake: Duration,
    /// Budget for `tools/call`.
    pub call: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            call: Duration::from_secs(60),
        }
    }
}

/// A carrier that exchanges one JSON-RPC message for one reply.
///
/// Messages without an `id` are notifications: implementations write them and
/// return an empty object without waiting for output.
#[async_trait]
pub trait Transport: Send {
    /// Send a message and wait (up to `timeout`) for its reply.
    async fn send(&mut self, message: &Value, timeout: Duration) -> Result<Value>;

    /// Whether the peer can still be reached.
    fn is_alive(&mut self) -> bool {
        true
    }

    /// Release the underlying resources. Calling it twice is a no-op.
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    /// Short name of the carrier, for logs.
    fn kind(&self) -> &'static str;
}

fn empty_reply() -> Value {
    Value::Object(Map::new())
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for HTTP transport.
#[derive(Debug, Clone, Default)]
pub struct HttpTransportConfig {
    /// Endpoint URL every message is POSTed to.
    pub url: String,
    /// Extra headers (e.g. authentication).
    pub headers: Vec<(String, String)>,
}

impl HttpTransportConfig {
    /// Create a new HTTP transport config with the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// Sends each message as one HTTP POST.
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// Create a new HTTP transport.
    pub fn connect(config: HttpTransportConfig) -> Result<Self> {
        url::Url::parse(&config.url)
            .map_err(|e| McpError::transport(format!("invalid URL '{}': {e}", config.url)))?;

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(5)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| McpError::transport(format!("failed to build HTTP client: {e}")))?;

        tracing::info!(url = %config.url, "created HTTP transport");

        Ok(Self { client, config })
    }

    /// The endpoint URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&mut self, message: &Value, timeout: Duration) -> Result<Value> {
        let body = serde_json::to_vec(message)?;

        tracing::trace!(url = %self.config.url, json = %message, "sending MCP HTTP request");

        let mut req = self
            .client
            .post(&self.config.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .timeout(timeout)
            .body(body);
        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        let resp = req.send().await.map_err(|e| map_reqwest_error(e, timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let is_event_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let text = resp.text().await.map_err(|e| map_reqwest_error(e, timeout))?;

        tracing::trace!(json = %text, "received MCP HTTP response");

        let parsed = if is_event_stream {
            first_event_payload(&text)
        } else {
            serde_json::from_str::<Value>(&text).ok()
        };

        match parsed {
            Some(value) if value.is_object() => Ok(value),
            _ => {
                tracing::debug!(
                    url = %self.config.url,
                    status = status.as_u16(),
                    "response carried no JSON object, treating as empty"
                );
                Ok(empty_reply())
            }
        }
    }

    fn kind(&self) -> &'static str {
        "http"
    }
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> McpError {
    if e.is_timeout() {
        McpError::Timeout(timeout)
    } else {
        McpError::transport(format!("HTTP request failed: {e}"))
    }
}

/// Pull the first JSON `data:` payload out of a server-sent-events body.
fn first_event_payload(body: &str) -> Option<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .find_map(|data| serde_json::from_str::<Value>(data.trim()).ok())
}

// ─────────────────────────────────────────────────────────────────────────────
// Stdio
// ─────────────────────────────────────────────────────────────────────────────

type PipeReader = Box<dyn AsyncBufRead + Send + Unpin>;
type PipeWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Talks line-delimited JSON to a child process (or any pair of pipes).
pub struct StdioTransport {
    label: String,
    child: Option<Child>,
    stdin: Option<PipeWriter>,
    /// Bytes queued for stdin. A write cut short by a deadline leaves its
    /// tail here and it goes out ahead of the next message.
    outbox: Vec<u8>,
    /// How much of `outbox` has reached the pipe.
    flushed: usize,
    framer: MessageFramer<PipeReader>,
    spawned: bool,
}

impl StdioTransport {
    /// Spawn `command` and take ownership of its standard streams.
    ///
    /// Standard error is forwarded to `tracing` at debug level and never
    /// parsed. Must be called from within a tokio runtime.
    pub fn spawn(
        label: impl Into<String>,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let label = label.into();

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::spawn_failed(format!("failed to spawn '{command}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdout"))?;

        if let Some(stderr) = child.stderr.take() {
            let server = label.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        tracing::debug!(server = %server, line = %line, "MCP server stderr");
                    }
                }
            });
        }

        tracing::info!(
            server = %label,
            command = %command,
            pid = child.id(),
            "spawned MCP server process"
        );

        Ok(Self {
            label,
            child: Some(child),
            stdin: Some(Box::new(stdin)),
            outbox: Vec::new(),
            flushed: 0,
            framer: MessageFramer::new(Box::new(BufReader::new(stdout))),
            spawned: true,
        })
    }

    /// Build a transport over arbitrary pipes, with no child process attached.
    pub fn from_pipes<R, W>(label: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            label: label.into(),
            child: None,
            stdin: Some(Box::new(writer)),
            outbox: Vec::new(),
            flushed: 0,
            framer: MessageFramer::new(Box::new(reader)),
            spawned: false,
        }
    }

    /// Set the framer's noise budget.
    pub fn with_max_noise_lines(mut self, max_noise_lines: usize) -> Self {
        self.framer.set_max_noise_lines(max_noise_lines);
        self
    }

    /// OS process id of the child, while it runs.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// `Some(code)` once the child has exited.
    fn exit_status(&mut self) -> Option<Option<i32>> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            _ => None,
        }
    }

    /// Error to report when the pipes are no longer usable.
    fn gone(&mut self) -> McpError {
        match self.exit_status() {
            Some(code) => McpError::ProcessExited { code },
            None if self.spawned && self.child.is_none() => McpError::ProcessExited { code: None },
            None => McpError::ConnectionClosed,
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        if self.stdin.is_none() {
            return Err(self.gone());
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(McpError::ConnectionClosed);
        };

        if self.flushed < self.outbox.len() {
            tracing::debug!(
                server = %self.label,
                pending = self.outbox.len() - self.flushed,
                "finishing an interrupted write"
            );
        }
        self.outbox.extend_from_slice(line.as_bytes());

        // `write` either lands some bytes or none, so progress survives
        // cancellation of this future.
        let written = loop {
            if self.flushed == self.outbox.len() {
                break stdin.flush().await;
            }
            match stdin.write(&self.outbox[self.flushed..]).await {
                Ok(0) => break Err(std::io::ErrorKind::WriteZero.into()),
                Ok(n) => self.flushed += n,
                Err(e) => break Err(e),
            }
        };

        match written {
            Ok(()) => {
                self.outbox.clear();
                self.flushed = 0;
                Ok(())
            }
            Err(e) => match self.exit_status() {
                Some(code) => Err(McpError::ProcessExited { code }),
                None => Err(McpError::Io(e)),
            },
        }
    }

    async fn exchange(&mut self, message: &Value) -> Result<Value> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        self.write_line(&line).await?;

        tracing::trace!(server = %self.label, json = %message, "sent MCP message");

        let Some(expected) = message.get("id").map(|_| message_id(message)) else {
            return Ok(empty_reply());
        };

        loop {
            let incoming = match self.framer.next_message().await {
                Ok(incoming) => incoming,
                Err(McpError::ConnectionClosed) => return Err(self.gone()),
                Err(e) => return Err(e),
            };

            if is_server_message(&incoming) {
                tracing::debug!(server = %self.label, json = %incoming, "ignoring server-initiated message");
                continue;
            }

            let Some(want) = expected else {
                return Ok(incoming);
            };
            if message_id(&incoming) == Some(want) {
                return Ok(incoming);
            }
            tracing::debug!(
                server = %self.label,
                got = ?incoming.get("id"),
                want,
                "discarding response that does not answer this request"
            );
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: &Value, timeout: Duration) -> Result<Value> {
        if let Some(code) = self.exit_status() {
            return Err(McpError::ProcessExited { code });
        }
        if self.stdin.is_none() {
            return Err(self.gone());
        }

        match tokio::time::timeout(timeout, self.exchange(message)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    server = %self.label,
                    timeout_ms = timeout.as_millis() as u64,
                    "MCP request timed out"
                );
                Err(McpError::Timeout(timeout))
            }
        }
    }

    fn is_alive(&mut self) -> bool {
        if self.stdin.is_none() {
            return false;
        }
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => !self.spawned,
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        // Closing stdin first lets well-behaved servers exit on their own.
        self.stdin.take();

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Err(e) = child.start_kill() {
            tracing::debug!(server = %self.label, error = %e, "MCP server already stopped");
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(server = %self.label, code = ?status.code(), "MCP server process stopped");
            }
            Ok(Err(e)) => {
                tracing::warn!(server = %self.label, error = %e, "failed to reap MCP server process");
            }
            Err(_) => {
                tracing::warn!(server = %self.label, "MCP server process did not exit in time");
            }
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "stdio"
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}
