//! CLI command definitions and dispatch for the `parley` binary.
//!
//! Uses clap derive macros for argument parsing. Chat commands follow a
//! noun-verb pattern (e.g., `parley chats list`).

pub mod chats;
pub mod check;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Chat backend with persistent transcripts and streamed completions.
#[derive(Parser)]
#[command(name = "parley", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Port to listen on (default from config.toml).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (default from config.toml).
        #[arg(long)]
        host: Option<String>,
    },

    /// Inspect and create chats in the local store.
    Chats {
        #[command(subcommand)]
        action: ChatsCommand,
    },

    /// Send a test completion to the configured provider.
    Check,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ChatsCommand {
    /// List chats, newest first.
    #[command(alias = "ls")]
    List,

    /// Show a chat transcript.
    Show {
        /// Chat ID.
        id: String,
    },

    /// Create an empty chat.
    Create,
}
