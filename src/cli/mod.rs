//! Command-line definitions (clap derive) and the handlers behind them.

use clap::builder::{styling::AnsiColor, Styles};
use clap::{Parser, Subcommand};

mod commands;
mod progress;

pub use commands::{run, App};
pub use progress::{spinner, ProgressBarSink};

/// llmpal - find, fetch and chat with local GGUF models
#[derive(Parser, Debug)]
#[command(
    name = "llmpal",
    author,
    version,
    styles = Styles::styled()
        .header(AnsiColor::Green.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default().bold())
        .placeholder(AnsiColor::Cyan.on_default()),
    about = "Find, download and chat with local GGUF models",
    after_help = "\x1b[1m\x1b[32mExamples:\x1b[0m\n   \
                  llmpal search \"qwen 7b\"            \x1b[90m# Ranked catalog matches\x1b[0m\n   \
                  llmpal download phi3 --activate    \x1b[90m# Fetch by alias and make it active\x1b[0m\n   \
                  llmpal chat llama3 --quant Q5_K_M  \x1b[90m# Resolve, fetch if needed, chat\x1b[0m\n   \
                  llmpal list                        \x1b[90m# Local models\x1b[0m\n"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search the catalogs and show ranked candidates
    Search {
        /// Free-text query, alias, or namespace/repo identifier
        query: String,
        /// Number of candidates to show
        #[arg(long, short = 'n', default_value_t = 10)]
        limit: usize,
        /// Preferred quantization, e.g. Q4_K_M
        #[arg(long, short = 'q')]
        quant: Option<String>,
    },

    /// Resolve a query and download the chosen file
    Download {
        query: String,
        #[arg(long, short = 'q')]
        quant: Option<String>,
        /// Download again even if the file is present
        #[arg(long)]
        force: bool,
        /// Make the downloaded model the active one
        #[arg(long)]
        activate: bool,
    },

    /// Chat with a model; uses the active model when no query is given
    Chat {
        query: Option<String>,
        #[arg(long, short = 'q')]
        quant: Option<String>,
    },

    /// List local models
    List,

    /// Make a local model the active one
    Activate {
        /// File name or stem of a local model
        name: String,
    },

    /// Delete a local model
    Remove {
        name: String,
        /// Do not ask for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Show endpoint health, local models and configured backends
    Status,
}
