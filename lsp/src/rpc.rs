//! `invoke` and `notify` over the session's shared stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};

use crate::codec::{FrameReader, FrameWriter};
use crate::diagnostics::DiagnosticsSink;
use crate::error::{RpcError, RpcResult};
use crate::launcher::{BoxedReader, BoxedWriter};
use crate::pending::{PendingTable, WaitError};
use crate::protocol::{self, CompletionItem, CompletionResponse, Notification, Request, method};
use crate::sequence::Sequence;

/// State shared between callers, the reader loop and the session.
pub(crate) struct Connection {
    /// The "server is available" gate.
    pub running: watch::Sender<bool>,
    /// Read side, owned by the reader loop while running.
    pub inbound: Mutex<Option<FrameReader<BoxedReader>>>,
    /// Write side; the mutex keeps frames from interleaving.
    pub outbound: Mutex<Option<FrameWriter<BoxedWriter>>>,
    pub pending: PendingTable,
    pub sequence: Sequence,
    pub diagnostics: DiagnosticsSink,
}

impl Connection {
    pub fn new() -> Self {
        let (running, _) = watch::channel(false);
        Self {
            running,
            inbound: Mutex::new(None),
            outbound: Mutex::new(None),
            pending: PendingTable::new(),
            sequence: Sequence::new(),
            diagnostics: DiagnosticsSink::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Flip the gate; returns the previous state.
    pub fn set_running(&self, running: bool) -> bool {
        self.running.send_replace(running)
    }

    /// Write one frame, serialized against every other writer.
    pub async fn write(&self, frame: &serde_json::Value) -> RpcResult<()> {
        let mut outbound = self.outbound.lock().await;
        let writer = outbound.as_mut().ok_or(RpcError::ServerNotRunning)?;
        writer.write_frame(frame).await.map_err(|e| match e {
            RpcError::Protocol(msg) => RpcError::ProcessExited(msg),
            other => other,
        })
    }
}

/// Deregisters a request id when its caller stops waiting, however that
/// happens. A no-op once the reader has resolved the id.
struct InFlight<'a> {
    pending: &'a PendingTable,
    id: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.pending.deregister(self.id) {
            tracing::trace!(id = self.id, "Dropped pending entry");
        }
    }
}

/// Cheap, cloneable handle for issuing requests and notifications.
#[derive(Clone)]
pub struct RpcClient {
    conn: Arc<Connection>,
    request_timeout: Duration,
}

impl RpcClient {
    pub(crate) fn new(conn: Arc<Connection>, request_timeout: Duration) -> Self {
        Self {
            conn,
            request_timeout,
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.conn.is_running()
    }

    /// Send a request and wait for its `result`, bounded by the default timeout.
    pub async fn invoke(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> RpcResult<serde_json::Value> {
        self.invoke_with_timeout(method, params, self.request_timeout)
            .await
    }

    pub async fn invoke_with_timeout(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> RpcResult<serde_json::Value> {
        if !self.conn.is_running() {
            return Err(RpcError::ServerNotRunning);
        }

        let id = self.conn.sequence.next();
        let frame = serde_json::to_value(Request::new(id, method, params))?;

        // Registered before the write so a fast reply cannot beat us to the table.
        let waiter = self.conn.pending.register(id)?;
        let _in_flight = InFlight {
            pending: &self.conn.pending,
            id,
        };
        // The reader may have failed the table between the check above and
        // the registration.
        if !self.conn.is_running() {
            return Err(RpcError::ServerNotRunning);
        }
        self.conn.write(&frame).await?;
        tracing::trace!(method, id, "Sent request");

        match waiter.wait(timeout).await {
            Ok(body) => protocol::into_result(body).map_err(|error| {
                tracing::debug!(method, id, code = error.code, "Request failed on server");
                RpcError::Server {
                    method: method.to_string(),
                    id,
                    code: error.code,
                    message: error.message,
                }
            }),
            Err(WaitError::TimedOut) => {
                tracing::warn!(method, id, ?timeout, "Request timed out");
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    id,
                    timeout,
                })
            }
            Err(WaitError::Abandoned) => Err(RpcError::ServerNotRunning),
        }
    }

    /// Send a notification. Never waits for the server.
    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> RpcResult<()> {
        if !self.conn.is_running() {
            return Err(RpcError::ServerNotRunning);
        }
        let frame = serde_json::to_value(Notification::new(method, params))?;
        self.conn.write(&frame).await?;
        tracing::trace!(method, "Sent notification");
        Ok(())
    }

    pub async fn did_open(
        &self,
        uri: &str,
        language_id: &str,
        version: i32,
        text: &str,
    ) -> RpcResult<()> {
        let params = protocol::did_open_params(uri, language_id, version, text);
        self.notify(method::DID_OPEN, Some(params)).await
    }

    pub async fn did_change(&self, uri: &str, version: i32, text: &str) -> RpcResult<()> {
        let params = protocol::did_change_params(uri, version, text);
        self.notify(method::DID_CHANGE, Some(params)).await
    }

    /// Completion items at a 0-based position, in server order.
    pub async fn completion(
        &self,
        uri: &str,
        line: u32,
        character: u32,
    ) -> RpcResult<Vec<CompletionItem>> {
        let params = protocol::completion_params(uri, line, character);
        let result = self.invoke(method::COMPLETION, Some(params)).await?;
        if result.is_null() {
            return Ok(Vec::new());
        }
        let response: CompletionResponse = serde_json::from_value(result)
            .map_err(|e| RpcError::protocol(format!("unexpected completion result: {e}")))?;
        Ok(response.into_items())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A connection whose write side is one end of an in-memory pipe.
    fn connected() -> (Arc<Connection>, FrameReader<tokio::io::DuplexStream>) {
        let conn = Arc::new(Connection::new());
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        *conn.outbound.try_lock().unwrap() = Some(FrameWriter::new(Box::new(ours) as BoxedWriter));
        conn.set_running(true);
        (conn, FrameReader::new(theirs))
    }

    #[tokio::test]
    async fn test_invoke_fails_fast_when_not_running() {
        let conn = Arc::new(Connection::new());
        let rpc = RpcClient::new(conn, Duration::from_secs(10));
        let started = std::time::Instant::now();
        assert!(matches!(
            rpc.invoke("initialize", None).await,
            Err(RpcError::ServerNotRunning)
        ));
        assert!(matches!(
            rpc.notify("exit", None).await,
            Err(RpcError::ServerNotRunning)
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_invoke_returns_result_of_matching_reply() {
        let (conn, mut server) = connected();
        let rpc = RpcClient::new(Arc::clone(&conn), Duration::from_secs(5));

        let call = tokio::spawn({
            let rpc = rpc.clone();
            async move { rpc.invoke("initialize", Some(serde_json::json!({}))).await }
        });

        let request = server.read_frame().await.unwrap().unwrap();
        assert_eq!(request["method"], "initialize");
        let id = request["id"].as_u64().unwrap();
        conn.pending
            .resolve(id, serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {"capabilities": {}}}));

        let result = call.await.unwrap().unwrap();
        assert_eq!(result, serde_json::json!({"capabilities": {}}));
    }

    #[tokio::test]
    async fn test_invoke_surfaces_server_error() {
        let (conn, mut server) = connected();
        let rpc = RpcClient::new(Arc::clone(&conn), Duration::from_secs(5));

        let call = tokio::spawn({
            let rpc = rpc.clone();
            async move { rpc.invoke("textDocument/completion", None).await }
        });

        let request = server.read_frame().await.unwrap().unwrap();
        let id = request["id"].as_u64().unwrap();
        conn.pending
            .resolve(
                id,
                serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32602, "message": "invalid params" }
                }),
            );

        match call.await.unwrap() {
            Err(RpcError::Server {
                method,
                id: err_id,
                code,
                message,
            }) => {
                assert_eq!(method, "textDocument/completion");
                assert_eq!(err_id, id);
                assert_eq!(code, -32602);
                assert_eq!(message, "invalid params");
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_deregisters_pending_entry() {
        let (conn, mut server) = connected();
        let rpc = RpcClient::new(Arc::clone(&conn), Duration::from_millis(50));

        let err = rpc.invoke("textDocument/completion", None).await.unwrap_err();
        let RpcError::Timeout { id, .. } = err else {
            panic!("expected timeout, got {err:?}");
        };
        assert!(!conn.pending.contains(id));

        // The request did go out; a late reply for it is dropped.
        let request = server.read_frame().await.unwrap().unwrap();
        assert_eq!(request["id"], id);
        assert!(!conn.pending.resolve(id, serde_json::json!({"id": id, "result": 1})));
    }

    #[tokio::test]
    async fn test_notify_writes_frame_without_id() {
        let (conn, mut server) = connected();
        let rpc = RpcClient::new(Arc::clone(&conn), Duration::from_secs(5));

        rpc.did_open("file:///test.cpp", "cpp", 1, "int x;").await.unwrap();

        let frame = server.read_frame().await.unwrap().unwrap();
        assert_eq!(frame["method"], "textDocument/didOpen");
        assert!(frame.get("id").is_none());
        assert!(conn.pending.is_empty());
        // Notifications do not consume ids.
        assert_eq!(conn.sequence.next(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_deregisters_entry() {
        let conn = Arc::new(Connection::new());
        let (ours, theirs) = tokio::io::duplex(64);
        drop(theirs);
        *conn.outbound.lock().await = Some(FrameWriter::new(Box::new(ours) as BoxedWriter));
        conn.set_running(true);
        let rpc = RpcClient::new(Arc::clone(&conn), Duration::from_secs(5));

        let err = rpc.invoke("initialize", None).await.unwrap_err();
        assert!(matches!(err, RpcError::ProcessExited(_)));
        assert!(conn.pending.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_request_reports_not_running() {
        let (conn, mut server) = connected();
        let rpc = RpcClient::new(Arc::clone(&conn), Duration::from_secs(5));

        let call = tokio::spawn({
            let rpc = rpc.clone();
            async move { rpc.invoke("textDocument/completion", None).await }
        });
        server.read_frame().await.unwrap().unwrap();
        conn.pending.fail_all();

        assert!(matches!(
            call.await.unwrap(),
            Err(RpcError::ServerNotRunning)
        ));
    }

    #[tokio::test]
    async fn test_dropped_invoke_deregisters_entry() {
        let (conn, mut server) = connected();
        let rpc = RpcClient::new(Arc::clone(&conn), Duration::from_secs(10));

        // An outer deadline cancels the call long before its own timeout.
        let outer = tokio::time::timeout(
            Duration::from_millis(50),
            rpc.invoke("textDocument/completion", None),
        )
        .await;
        assert!(outer.is_err());
        assert_eq!(conn.pending.len(), 0);

        // The request was written; its reply now has nowhere to go.
        let request = server.read_frame().await.unwrap().unwrap();
        let id = request["id"].as_u64().unwrap();
        assert!(!conn.pending.resolve(id, serde_json::json!({"id": id, "result": null})));
    }

    #[tokio::test]
    async fn test_invoke_after_gate_closes_fails_fast() {
        let (conn, _server) = connected();
        let rpc = RpcClient::new(Arc::clone(&conn), Duration::from_secs(10));

        // Writer still attached, but the reader has already given up.
        conn.set_running(false);
        conn.pending.fail_all();

        let started = std::time::Instant::now();
        assert!(matches!(
            rpc.invoke("textDocument/completion", None).await,
            Err(RpcError::ServerNotRunning)
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(conn.pending.is_empty());
    }
}
