//! Spawning the server process.
//!
//! The session never calls `Command` directly; it asks a [`Launcher`] for a
//! fresh set of pipes. [`CommandLauncher`] is the real implementation, tests
//! substitute in-memory pipes.

use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use crate::error::{RpcError, RpcResult};
use crate::types::ServerConfig;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Environment variable patterns never passed on to the server process.
const ENV_SECRET_DENYLIST: &[&str] = &[
    "*_API_KEY",
    "*_TOKEN",
    "*_SECRET*",
    "*_PASSWORD",
    "*_CREDENTIAL*",
    "AWS_*",
];

/// The pipes of one server process.
pub struct ServerIo {
    /// Server stdout: the frames we decode.
    pub reader: BoxedReader,
    /// Server stdin: the frames we write.
    pub writer: BoxedWriter,
    /// Server stderr, drained into the log when present.
    pub stderr: Option<BoxedReader>,
    /// The process itself, if there is one to reap.
    pub child: Option<Child>,
}

impl ServerIo {
    pub fn new(reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            reader,
            writer,
            stderr: None,
            child: None,
        }
    }
}

/// Produces a freshly started server each time it is called.
pub trait Launcher: Send + Sync {
    fn launch(&self) -> RpcResult<ServerIo>;

    /// Human-readable name for logs.
    fn describe(&self) -> String {
        String::from("server")
    }
}

/// Minimal glob matcher for the env denylist.
/// Handles `*_SUFFIX`, `PREFIX_*`, `*_INFIX*`, and exact match.
fn env_glob_matches(pattern: &str, key_upper: &str) -> bool {
    let pat = pattern.to_uppercase();
    match (pat.starts_with('*'), pat.ends_with('*')) {
        (true, true) => key_upper.contains(&pat[1..pat.len() - 1]),
        (true, false) => key_upper.ends_with(&pat[1..]),
        (false, true) => key_upper.starts_with(&pat[..pat.len() - 1]),
        (false, false) => key_upper == pat,
    }
}

/// Launches the configured executable with piped stdio.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    config: ServerConfig,
}

impl CommandLauncher {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Whether the configured executable can be found on `PATH`.
    #[must_use]
    pub fn is_available(&self) -> bool {
        which::which(&self.config.command).is_ok()
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self) -> RpcResult<ServerIo> {
        let command = &self.config.command;
        let resolved = which::which(command).map_err(|e| RpcError::Process {
            command: command.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, e),
        })?;

        let mut cmd = Command::new(&resolved);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, _) in std::env::vars() {
            let upper = key.to_uppercase();
            if ENV_SECRET_DENYLIST
                .iter()
                .any(|pat| env_glob_matches(pat, &upper))
            {
                cmd.env_remove(&key);
            }
        }

        tracing::debug!(
            command = %resolved.display(),
            args = ?self.config.args,
            "Spawning server"
        );

        let mut child = cmd.spawn().map_err(|source| RpcError::Process {
            command: command.clone(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RpcError::ProcessExited("no stdout from child".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RpcError::ProcessExited("no stdin from child".to_string()))?;
        let stderr = child.stderr.take();

        Ok(ServerIo {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            stderr: stderr.map(|s| Box::new(s) as BoxedReader),
            child: Some(child),
        })
    }

    fn describe(&self) -> String {
        self.config.command.clone()
    }
}
