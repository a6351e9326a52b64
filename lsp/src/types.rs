//! Configuration types consumed by the session.
//!
//! `relay-config` deserializes these from the user's config file; tests and
//! embedders may construct them directly.

use std::time::Duration;

use serde::Deserialize;

/// Default deadline for a request reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for a diagnostics push.
pub const DEFAULT_DIAGNOSTICS_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `shutdown` waits for the process before killing it.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// The server executable and the documents it handles.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Executable command (e.g. "clangd").
    pub command: String,
    pub args: Vec<String>,
    /// Language identifier sent with `didOpen` (e.g. "cpp").
    pub language_id: String,
    /// Editor filetypes this server completes for.
    pub filetypes: Vec<String>,
    /// Workspace root sent in `initialize`.
    pub root_uri: Option<String>,
}

fn default_language_id() -> String {
    String::from("cpp")
}

fn default_filetypes() -> Vec<String> {
    ["c", "cpp", "objc", "objcpp"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: String::from("clangd"),
            args: Vec::new(),
            language_id: default_language_id(),
            filetypes: default_filetypes(),
            root_uri: None,
        }
    }
}

/// Deadlines applied by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub request_timeout: Duration,
    pub diagnostics_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            diagnostics_timeout: DEFAULT_DIAGNOSTICS_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}
