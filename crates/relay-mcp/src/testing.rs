//! In-process fakes shared by the unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::Result;
use crate::transport::Transport;

type Handler = Box<dyn FnMut(&Value) -> Result<Value> + Send>;

/// Everything a [`MockTransport`] was asked to send.
#[derive(Clone, Default)]
pub(crate) struct SentLog(Arc<Mutex<Vec<Value>>>);

impl SentLog {
    pub(crate) fn messages(&self) -> Vec<Value> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    /// Messages with the given method, in send order.
    pub(crate) fn with_method(&self, method: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m["method"] == method)
            .collect()
    }

    pub(crate) fn shutdowns(&self) -> usize {
        self.with_method("$shutdown").len()
    }
}

/// A transport answered by a closure.
pub(crate) struct MockTransport {
    sent: SentLog,
    handler: Handler,
    delay: Option<Duration>,
}

impl MockTransport {
    pub(crate) fn new(handler: impl FnMut(&Value) -> Result<Value> + Send + 'static) -> Self {
        Self {
            sent: SentLog::default(),
            handler: Box::new(handler),
            delay: None,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn log(&self) -> SentLog {
        self.sent.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: &Value, timeout: Duration) -> Result<Value> {
        self.sent.0.lock().unwrap().push(message.clone());
        if let Some(delay) = self.delay {
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(crate::McpError::Timeout(timeout));
            }
            tokio::time::sleep(delay).await;
        }
        (self.handler)(message)
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.sent
            .0
            .lock()
            .unwrap()
            .push(json!({"method": "$shutdown"}));
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "mock"
    }
}

pub(crate) fn ok(request: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": request["id"], "result": result})
}

pub(crate) fn rpc_error(request: &Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": request["id"], "error": {"code": code, "message": message}})
}

/// A well-behaved server exposing the given tool names.
pub(crate) fn server_with_tools(tools: &[&str]) -> MockTransport {
    let tools: Vec<Value> = tools
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "description": format!("{name} tool"),
                "inputSchema": {"type": "object"}
            })
        })
        .collect();

    MockTransport::new(move |request| {
        let reply = match request["method"].as_str() {
            Some("initialize") => ok(
                request,
                json!({
                    "protocolVersion": request["params"]["protocolVersion"],
                    "serverInfo": {"name": "mock", "version": "1.0"}
                }),
            ),
            Some("tools/list") => ok(request, json!({"tools": tools.clone()})),
            Some("tools/call") => ok(
                request,
                json!({
                    "content": [{"type": "text", "text": request["params"]["name"]}]
                }),
            ),
            _ => json!({}),
        };
        Ok(reply)
    })
}
