//! Line-delimited JSON framing for subprocess pipes.
//!
//! MCP servers launched as child processes write one JSON message per line,
//! but many of them also print banners or log chatter to the same stream.
//! [`MessageFramer`] pulls lines until one parses as JSON and drops the rest.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{McpError, Result};

/// Default number of non-protocol lines tolerated per message.
pub const DEFAULT_MAX_NOISE_LINES: usize = 500;

/// Extracts JSON messages from a noisy line stream.
pub struct MessageFramer<R> {
    reader: R,
    max_noise_lines: usize,
    buf: Vec<u8>,
}

impl<R> MessageFramer<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Wrap a buffered reader with the default noise budget.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            max_noise_lines: DEFAULT_MAX_NOISE_LINES,
            buf: Vec::with_capacity(4096),
        }
    }

    /// Set how many non-JSON lines a single [`next_message`](Self::next_message) may skip.
    pub fn with_max_noise_lines(mut self, max_noise_lines: usize) -> Self {
        self.max_noise_lines = max_noise_lines;
        self
    }

    /// Change the noise budget in place.
    pub fn set_max_noise_lines(&mut self, max_noise_lines: usize) {
        self.max_noise_lines = max_noise_lines;
    }

    /// The configured noise budget.
    pub fn max_noise_lines(&self) -> usize {
        self.max_noise_lines
    }

    /// Read lines until one is a complete JSON object or array.
    ///
    /// Fails with [`McpError::ConnectionClosed`] at end of stream and with
    /// [`McpError::FramingTimeout`] once the noise budget is spent.
    pub async fn next_message(&mut self) -> Result<Value> {
        let mut skipped = 0usize;

        loop {
            self.buf.clear();
            let read = self.reader.read_until(b'\n', &mut self.buf).await?;
            if read == 0 {
                return Err(McpError::ConnectionClosed);
            }

            let line = String::from_utf8_lossy(&self.buf);
            let trimmed = line.trim();

            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(value) => {
                        tracing::trace!(json = %trimmed, "received MCP message");
                        return Ok(value);
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, line = %trimmed, "skipping malformed JSON line");
                    }
                }
            } else if !trimmed.is_empty() {
                tracing::debug!(line = %trimmed, "skipping non-protocol output");
            }

            skipped += 1;
            if skipped >= self.max_noise_lines {
                return Err(McpError::FramingTimeout { skipped });
            }
        }
    }

    /// Give back the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    fn framer(input: impl Into<Vec<u8>>) -> MessageFramer<BufReader<Cursor<Vec<u8>>>> {
        MessageFramer::new(BufReader::new(Cursor::new(input.into())))
    }

    #[tokio::test]
    async fn test_skips_banner_lines() {
        let mut framer = framer(
            "startup banner\nmore log text\n{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{}}\n",
        );
        let message = framer.next_message().await.unwrap();
        assert_eq!(message, json!({"jsonrpc": "2.0", "id": 2, "result": {}}));

        // Nothing else in the stream.
        assert!(matches!(
            framer.next_message().await,
            Err(McpError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_yields_consecutive_messages() {
        let mut framer = framer("{\"id\":1}\n\n  {\"id\":2}  \r\n[1,2]\n");
        assert_eq!(framer.next_message().await.unwrap(), json!({"id": 1}));
        assert_eq!(framer.next_message().await.unwrap(), json!({"id": 2}));
        assert_eq!(framer.next_message().await.unwrap(), json!([1, 2]));
    }

    #[tokio::test]
    async fn test_malformed_json_is_noise() {
        let mut framer = framer("{\"id\": 1, \"truncated\n{\"id\":1,\"result\":{}}\n");
        assert_eq!(
            framer.next_message().await.unwrap(),
            json!({"id": 1, "result": {}})
        );
    }

    #[tokio::test]
    async fn test_last_line_without_newline() {
        let mut framer = framer("log\n{\"id\":9}");
        assert_eq!(framer.next_message().await.unwrap(), json!({"id": 9}));
    }

    #[tokio::test]
    async fn test_noise_budget_exhausted() {
        let noise: String = (0..20).map(|i| format!("log line {i}\n")).collect();
        let mut framer = framer(noise).with_max_noise_lines(5);
        match framer.next_message().await {
            Err(McpError::FramingTimeout { skipped }) => assert_eq!(skipped, 5),
            other => panic!("expected FramingTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        assert!(matches!(
            framer("").next_message().await,
            Err(McpError::ConnectionClosed)
        ));
        assert!(matches!(
            framer("only\nnoise\n").next_message().await,
            Err(McpError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_not_fatal() {
        let mut framer = framer(b"\xff\xfe garbage\n{\"id\":4}\n".to_vec());
        assert_eq!(framer.next_message().await.unwrap(), json!({"id": 4}));
    }

    #[test]
    fn test_default_budget() {
        assert_eq!(framer("").max_noise_lines(), DEFAULT_MAX_NOISE_LINES);
    }
}
