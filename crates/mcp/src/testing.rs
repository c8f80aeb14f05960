//! In-process transport for tests: answers each method from a scripted
//! response table instead of spawning a server process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::protocol::JsonRpcResponse;
use crate::transport::{McpTransport, TransportError};

pub struct ScriptedTransport {
    responses: Mutex<HashMap<String, Value>>,
    /// Methods that should fail with a transport error.
    failing: Mutex<Vec<String>>,
    calls: Mutex<Vec<(String, Option<Value>)>>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            failing: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        }
    }

    /// Script the result value returned for a method.
    pub fn on(self, method: &str, result: Value) -> Self {
        self.responses.lock().insert(method.to_owned(), result);
        self
    }

    /// Make a method fail with a transport error.
    pub fn failing_on(self, method: &str) -> Self {
        self.failing.lock().push(method.to_owned());
        self
    }

    /// Every request observed so far, in order.
    pub fn recorded_calls(&self) -> Vec<(String, Option<Value>)> {
        self.calls.lock().clone()
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl McpTransport for ScriptedTransport {
    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, TransportError> {
        self.calls.lock().push((method.to_owned(), params));
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        if self.failing.lock().iter().any(|m| m == method) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("scripted failure for {method}"),
            )));
        }
        let result = self
            .responses
            .lock()
            .get(method)
            .cloned()
            .unwrap_or(Value::Object(Default::default()));
        Ok(JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            result: Some(result),
            error: None,
        })
    }

    async fn send_notification(&self, _method: &str) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.kill();
    }
}
