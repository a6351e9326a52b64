//! Configuration for relay, read from `~/.relay/config.toml`.
//!
//! ```toml
//! [server]
//! command = "clangd"
//! args = ["--background-index"]
//! root_uri = "file://${HOME}/src/project"
//!
//! [timeouts]
//! request_secs = 10
//!
//! [log]
//! level = "debug"
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_lsp::{ServerConfig, SessionOptions};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config at {path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } | Self::Invalid { path, .. } => {
                path
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub timeouts: TimeoutsConfig,
    pub log: LogConfig,
}

/// Deadlines, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub request_secs: u64,
    pub diagnostics_secs: u64,
    pub shutdown_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        let defaults = SessionOptions::default();
        Self {
            request_secs: defaults.request_timeout.as_secs(),
            diagnostics_secs: defaults.diagnostics_timeout.as_secs(),
            shutdown_secs: defaults.shutdown_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
        }
    }
}

impl RelayConfig {
    /// Load the user config. A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                tracing::debug!("No home directory; using default config");
                Ok(Self::default())
            }
        }
    }

    /// Load from an explicit path. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file; using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        config.expand_env();
        config.validate(path)?;
        Ok(config)
    }

    fn expand_env(&mut self) {
        let server = &mut self.server;
        server.command = expand_env_vars(&server.command);
        for arg in &mut server.args {
            *arg = expand_env_vars(arg);
        }
        if let Some(root) = server.root_uri.as_mut() {
            *root = expand_env_vars(root);
        }
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |message: &str| ConfigError::Invalid {
            path: path.to_path_buf(),
            message: message.to_string(),
        };
        if self.server.command.trim().is_empty() {
            return Err(invalid("server.command must not be empty"));
        }
        if self.timeouts.request_secs == 0 || self.timeouts.diagnostics_secs == 0 {
            return Err(invalid("timeouts must be at least one second"));
        }
        Ok(())
    }

    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            request_timeout: Duration::from_secs(self.timeouts.request_secs),
            diagnostics_timeout: Duration::from_secs(self.timeouts.diagnostics_secs),
            shutdown_timeout: Duration::from_secs(self.timeouts.shutdown_secs),
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

/// Replace each `${VAR}` with the variable's value; unset variables become
/// empty. An unclosed `${` is kept verbatim.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Directory holding the config file and logs.
#[must_use]
pub fn relay_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".relay"))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    relay_dir().map(|dir| dir.join("config.toml"))
}
