//! Owns the server process, the running gate and the handshake.
//!
//! A session is created idle. [`Session::start`] launches the server, opens
//! the gate, spawns the reader loop (once per session) and performs the
//! `initialize` handshake. When the reader loop loses the stream it closes
//! the gate and every request fails fast with [`RpcError::ServerNotRunning`]
//! until [`Session::restart`] is called. Nothing restarts automatically.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::error::{RpcError, RpcResult};
use crate::launcher::{BoxedReader, Launcher};
use crate::protocol::{self, InitializeResult, PublishDiagnosticsParams, method};
use crate::reader;
use crate::rpc::{Connection, RpcClient};
use crate::types::SessionOptions;

pub struct Session {
    conn: Arc<Connection>,
    rpc: RpcClient,
    launcher: Box<dyn Launcher>,
    options: SessionOptions,
    root_uri: Option<String>,
    child: Mutex<Option<Child>>,
    reader_task: OnceLock<JoinHandle<()>>,
    /// Serializes start, restart and shutdown against each other.
    lifecycle: Mutex<()>,
}

impl Session {
    /// An idle session. Nothing is spawned until [`Session::start`].
    pub fn new(launcher: impl Launcher + 'static, options: SessionOptions) -> Self {
        let conn = Arc::new(Connection::new());
        Self {
            rpc: RpcClient::new(Arc::clone(&conn), options.request_timeout),
            conn,
            launcher: Box::new(launcher),
            options,
            root_uri: None,
            child: Mutex::new(None),
            reader_task: OnceLock::new(),
            lifecycle: Mutex::new(()),
        }
    }

    /// Workspace root sent with `initialize`.
    #[must_use]
    pub fn with_root_uri(mut self, root_uri: Option<String>) -> Self {
        self.root_uri = root_uri;
        self
    }

    /// Launch the server and run the handshake; returns the `initialize` result.
    pub async fn start(&self, capabilities: serde_json::Value) -> RpcResult<InitializeResult> {
        let _lifecycle = self.lifecycle.lock().await;
        tracing::info!(server = %self.launcher.describe(), "Starting server");
        self.launch_and_initialize(capabilities).await
    }

    /// Tear down whatever is left of the current server, then start a new one.
    pub async fn restart(&self, capabilities: serde_json::Value) -> RpcResult<InitializeResult> {
        let _lifecycle = self.lifecycle.lock().await;
        tracing::info!(server = %self.launcher.describe(), "Restarting server");
        self.launch_and_initialize(capabilities).await
    }

    async fn launch_and_initialize(
        &self,
        capabilities: serde_json::Value,
    ) -> RpcResult<InitializeResult> {
        self.detach().await;

        let io = self.launcher.launch()?;
        if let Some(stderr) = io.stderr {
            spawn_stderr_drain(stderr);
        }
        *self.child.lock().await = io.child;
        *self.conn.inbound.lock().await = Some(FrameReader::new(io.reader));
        *self.conn.outbound.lock().await = Some(FrameWriter::new(io.writer));
        self.conn.set_running(true);

        self.reader_task
            .get_or_init(|| tokio::spawn(reader::run(Arc::clone(&self.conn))));

        self.initialize(capabilities).await
    }

    async fn initialize(&self, capabilities: serde_json::Value) -> RpcResult<InitializeResult> {
        let params = protocol::initialize_params(capabilities, self.root_uri.as_deref());
        let result = self.rpc.invoke(method::INITIALIZE, Some(params)).await?;
        let init: InitializeResult = if result.is_null() {
            InitializeResult::default()
        } else {
            serde_json::from_value(result)
                .map_err(|e| RpcError::protocol(format!("unexpected initialize result: {e}")))?
        };

        self.rpc
            .notify(method::INITIALIZED, Some(serde_json::json!({})))
            .await?;

        match &init.server_info {
            Some(info) => tracing::info!(
                name = %info.name,
                version = info.version.as_deref().unwrap_or("unknown"),
                "Server initialized"
            ),
            None => tracing::info!("Server initialized"),
        }
        Ok(init)
    }

    /// Close the gate, drop both pipes, kill the old process and fail
    /// whatever was still waiting on it.
    async fn detach(&self) {
        self.conn.set_running(false);
        // The reader lets go of the inbound stream once it sees the gate close.
        *self.conn.inbound.lock().await = None;
        if let Some(mut writer) = self.conn.outbound.lock().await.take() {
            let _ = writer.close().await;
        }
        if let Some(mut child) = self.child.lock().await.take() {
            reap(&mut child, self.options.shutdown_timeout).await;
        }
        self.conn.pending.fail_all();
    }

    /// Polite shutdown: `shutdown` request, `exit` notification, then reap.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.conn.is_running() {
            match self
                .rpc
                .invoke_with_timeout(method::SHUTDOWN, None, self.options.shutdown_timeout)
                .await
            {
                Ok(_) => {
                    let _ = self.rpc.notify(method::EXIT, None).await;
                }
                Err(e) => tracing::debug!("Server did not acknowledge shutdown: {e}"),
            }
        }
        self.detach().await;
        tracing::info!(server = %self.launcher.describe(), "Server shut down");
    }

    /// Handle for issuing requests, cloneable across tasks.
    #[must_use]
    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    pub async fn invoke(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> RpcResult<serde_json::Value> {
        self.rpc.invoke(method, params).await
    }

    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> RpcResult<()> {
        self.rpc.notify(method, params).await
    }

    /// Wait for the next diagnostics push, bounded by the configured timeout.
    pub async fn take_diagnostics(&self) -> RpcResult<PublishDiagnosticsParams> {
        self.conn
            .diagnostics
            .take(self.options.diagnostics_timeout)
            .await
    }

    pub async fn take_diagnostics_within(
        &self,
        timeout: Duration,
    ) -> RpcResult<PublishDiagnosticsParams> {
        self.conn.diagnostics.take(timeout).await
    }

    #[must_use]
    pub fn try_take_diagnostics(&self) -> Option<PublishDiagnosticsParams> {
        self.conn.diagnostics.try_take()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.conn.is_running()
    }

    /// Resolves once the running gate is closed.
    pub async fn stopped(&self) {
        let mut gate = self.conn.running.subscribe();
        let _ = gate.wait_for(|running| !*running).await;
    }

    /// Whether the reader loop task exists and has not exited.
    #[must_use]
    pub fn reader_alive(&self) -> bool {
        self.reader_task
            .get()
            .is_some_and(|task| !task.is_finished())
    }

    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Number of requests still awaiting a reply.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.conn.pending.len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.get() {
            task.abort();
        }
    }
}

async fn reap(child: &mut Child, timeout: Duration) {
    match child.try_wait() {
        Ok(Some(status)) => {
            tracing::debug!(%status, "Server process already exited");
            return;
        }
        Ok(None) => {}
        Err(e) => tracing::debug!("Failed to poll server process: {e}"),
    }
    if tokio::time::timeout(timeout, child.wait()).await.is_err() {
        tracing::debug!("Server didn't exit in time, killing");
        let _ = child.kill().await;
    }
}

fn spawn_stderr_drain(stderr: BoxedReader) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => tracing::debug!(target: "relay_lsp::stderr", "{line}"),
                Ok(None) => break,
                Err(e) => {
                    tracing::trace!("Stopped reading server stderr: {e}");
                    break;
                }
            }
        }
    });
}
