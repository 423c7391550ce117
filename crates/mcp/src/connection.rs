//! JSON-RPC connection over a pair of byte streams.
//!
//! A reader task routes each response to the waiter registered under its
//! request id. The connection does not care whether the streams are a child
//! process's pipes or an in-memory duplex.

use corvid_core::error::ToolError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::{
    Incoming, JSONRPC_VERSION, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, parse_incoming,
};

type ResponseWaiter = oneshot::Sender<JsonRpcResponse>;
type PendingMap = Arc<StdMutex<HashMap<u64, ResponseWaiter>>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Removes a waiter from the pending map when the request future is dropped
/// (timeout or caller cancellation), so abandoned ids do not accumulate.
struct PendingGuard {
    id: u64,
    pending: PendingMap,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

pub struct McpConnection {
    label: String,
    writer: Mutex<Writer>,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader_task: JoinHandle<()>,
}

impl McpConnection {
    /// Start a connection over `reader`/`writer`. `label` names the server in logs.
    pub fn from_streams<R, W>(
        label: impl Into<String>,
        reader: R,
        writer: W,
        request_timeout: Duration,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let label = label.into();
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let reader_task = tokio::spawn(Self::handle_messages(
            label.clone(),
            reader,
            pending.clone(),
        ));

        Self {
            label,
            writer: Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            reader_task,
        }
    }

    async fn handle_messages<R>(label: String, reader: R, pending: PendingMap)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(server = %label, error = %e, "Failed reading from tool server");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match parse_incoming(&line) {
                Some(Incoming::Response(response)) => {
                    let Some(id) = response.id.as_u64() else {
                        warn!(server = %label, id = %response.id, "Response with non-numeric id");
                        continue;
                    };
                    let waiter = pending
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&id);
                    match waiter {
                        Some(waiter) => {
                            let _ = waiter.send(response);
                        }
                        None => warn!(server = %label, id, "Response for unknown request id"),
                    }
                }
                Some(Incoming::Notification { method }) => {
                    debug!(server = %label, %method, "Tool server notification");
                }
                Some(Incoming::Request { method, .. }) => {
                    warn!(server = %label, %method, "Ignoring request from tool server");
                }
                None => debug!(server = %label, %line, "Non JSON-RPC output from tool server"),
            }
        }

        // Dropping every waiter wakes in-flight requests with a closed-channel error.
        pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
        debug!(server = %label, "Tool server stream closed");
    }

    async fn write_line(&self, message: &impl serde::Serialize) -> Result<(), ToolError> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| ToolError::Transport(format!("{}: encode failed: {e}", self.label)))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ToolError::Transport(format!("{}: write failed: {e}", self.label)))?;
        writer
            .flush()
            .await
            .map_err(|e| ToolError::Transport(format!("{}: flush failed: {e}", self.label)))
    }

    /// Send a request and wait for its raw result value.
    pub async fn request_value(&self, method: &str, params: Option<Value>) -> Result<Value, ToolError> {
        if self.reader_task.is_finished() {
            return Err(ToolError::Transport(format!("{}: connection closed", self.label)));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        // Register before writing so a fast response cannot race the insert.
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        let _guard = PendingGuard {
            id,
            pending: self.pending.clone(),
        };

        self.write_line(&JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        })
        .await?;

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(ToolError::Transport(format!(
                    "{}: connection closed while waiting for {method}",
                    self.label
                )));
            }
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool_name: format!("{}:{method}", self.label),
                    timeout_secs: self.request_timeout.as_secs(),
                });
            }
        };

        if let Some(error) = response.error {
            return Err(ToolError::InvocationFailed {
                tool_name: format!("{}:{method}", self.label),
                reason: format!("{} (code {})", error.message, error.code),
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Send a request and decode its result.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, ToolError> {
        let value = self.request_value(method, params).await?;
        serde_json::from_value(value).map_err(|e| {
            ToolError::Transport(format!("{}: malformed {method} result: {e}", self.label))
        })
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ToolError> {
        self.write_line(&JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        })
        .await
    }

    /// Requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn close(&self) {
        self.reader_task.abort();
    }
}

impl Drop for McpConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
