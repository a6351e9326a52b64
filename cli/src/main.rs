//! relay CLI - one-shot completion and diagnostics against a language server.
//!
//! ```text
//! main() -> RelayConfig::load -> Session::start -> LspCompleter
//!                                     |
//!                                     v
//!             didOpen -> completion -> publishDiagnostics -> shutdown
//! ```

mod args;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::Parser;
use relay_config::RelayConfig;
use relay_lsp::{
    BufferRequest, CommandLauncher, Completer, LspCompleter, RpcError, Session, should_enable,
};
use relay_types::{Candidate, Diagnostic};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::args::{Cli, Command, CompleteArgs};

fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_relay_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Stdout carries results; logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_relay_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in relay_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn relay_log_file_candidates() -> Vec<PathBuf> {
    relay_config::relay_dir()
        .map(|dir| dir.join("logs").join("relay.log"))
        .into_iter()
        .collect()
}

/// Editor filetype for a path, from its extension.
fn filetype_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let filetype = match ext.as_str() {
        "c" => "c",
        "cc" | "cpp" | "cxx" | "c++" | "h" | "hh" | "hpp" | "hxx" | "inl" => "cpp",
        "m" => "objc",
        "mm" => "objcpp",
        _ => return None,
    };
    Some(filetype)
}

/// What we advertise in `initialize`.
fn client_capabilities() -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "completion": {
                "completionItem": { "snippetSupport": false }
            },
            "publishDiagnostics": { "relatedInformation": false }
        }
    })
}

fn print_candidate(candidate: &Candidate) {
    let kind = candidate.kind.map_or("", |k| k.label());
    match &candidate.detail {
        Some(detail) => println!("{}\t{kind}\t{detail}", candidate.insertion_text),
        None => println!("{}\t{kind}", candidate.insertion_text),
    }
}

fn print_diagnostic(diagnostic: &Diagnostic) {
    println!("{diagnostic}");
}

async fn complete(config: &RelayConfig, args: &CompleteArgs) -> Result<()> {
    let path = fs::canonicalize(&args.file)
        .with_context(|| format!("Failed to resolve {}", args.file.display()))?;
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filetype = match (&args.filetype, filetype_for(&path)) {
        (Some(filetype), _) => filetype.clone(),
        (None, Some(filetype)) => filetype.to_string(),
        (None, None) => bail!(
            "Can't tell the filetype of {}; pass --filetype",
            path.display()
        ),
    };

    let launcher = CommandLauncher::new(config.server.clone());
    let session = Arc::new(
        Session::new(launcher, config.session_options())
            .with_root_uri(config.server.root_uri.clone()),
    );
    let completer = LspCompleter::new(Arc::clone(&session), &config.server);
    if !completer.supports(&filetype) {
        bail!("Server is not configured for filetype '{filetype}'");
    }

    session
        .start(client_capabilities())
        .await
        .context("Failed to start server")?;

    let result = run_completion(&completer, path, contents, filetype, args).await;
    session.shutdown().await;
    result
}

async fn run_completion(
    completer: &LspCompleter,
    path: PathBuf,
    contents: String,
    filetype: String,
    args: &CompleteArgs,
) -> Result<()> {
    let request = BufferRequest::new(path, filetype, contents).at(args.line, args.column);

    completer
        .on_buffer_visit(&request)
        .await
        .context("Failed to open document")?;

    let candidates = completer
        .compute_candidates(&request)
        .await
        .context("Completion request failed")?;
    for candidate in &candidates {
        print_candidate(candidate);
    }
    tracing::info!(count = candidates.len(), "Completion done");

    if args.no_diagnostics {
        return Ok(());
    }
    match completer.diagnostics_for_file(&request).await {
        Ok(diagnostics) => {
            for diagnostic in &diagnostics {
                print_diagnostic(diagnostic);
            }
            Ok(())
        }
        Err(RpcError::DiagnosticsTimeout { timeout }) => {
            tracing::info!(?timeout, "No diagnostics pushed");
            Ok(())
        }
        Err(e) => Err(e).context("Failed to collect diagnostics"),
    }
}

fn check(config: &RelayConfig) -> Result<()> {
    if should_enable(&config.server) {
        println!("{}: available", config.server.command);
        Ok(())
    } else {
        bail!("{}: not found on PATH", config.server.command)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RelayConfig::load_from(path),
        None => RelayConfig::load(),
    }
    .context("Failed to load config")?;

    init_tracing(&config.log.level);

    match &cli.command {
        Command::Complete(args) => complete(&config, args).await,
        Command::Check => check(&config),
    }
}
