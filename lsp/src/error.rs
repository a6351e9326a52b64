//! Error taxonomy for the RPC engine.

use std::time::Duration;

use thiserror::Error;

/// Result type for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors surfaced by the codec, the session and the RPC facade.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Malformed or incomplete framing, or a body that is not valid JSON.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No correlated reply arrived before the deadline.
    #[error("request '{method}' (id {id}) timed out after {}ms", timeout.as_millis())]
    Timeout {
        method: String,
        id: u64,
        timeout: Duration,
    },

    /// No diagnostics were pushed before the deadline.
    #[error("no diagnostics received within {}ms", timeout.as_millis())]
    DiagnosticsTimeout { timeout: Duration },

    /// The server process could not be started.
    #[error("failed to start server '{command}': {source}")]
    Process {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The server process is gone or its pipes were not captured.
    #[error("server process error: {0}")]
    ProcessExited(String),

    /// An operation was attempted while the running gate is clear.
    #[error("server is not running")]
    ServerNotRunning,

    /// A well-formed reply carrying a JSON-RPC error payload.
    #[error("request '{method}' (id {id}) failed with code {code}: {message}")]
    Server {
        method: String,
        id: u64,
        code: i64,
        message: String,
    },
}

impl RpcError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        Self::Protocol(format!("stream I/O failed: {err}"))
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("invalid JSON: {err}"))
    }
}
