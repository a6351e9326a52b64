//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "Completion and diagnostics from a language server")]
pub struct Cli {
    /// Config file (defaults to ~/.relay/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print completions at a position, then the file's diagnostics
    Complete(CompleteArgs),

    /// Report whether the configured server can be launched
    Check,
}

#[derive(Parser, Debug, Clone)]
pub struct CompleteArgs {
    /// Source file to complete in
    pub file: PathBuf,

    /// 1-based line number
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub line: u32,

    /// Character offset within the line
    #[arg(short, long, default_value = "0")]
    pub column: u32,

    /// Filetype override (otherwise taken from the extension)
    #[arg(short = 't', long)]
    pub filetype: Option<String>,

    /// Skip waiting for diagnostics
    #[arg(long)]
    pub no_diagnostics: bool,
}
