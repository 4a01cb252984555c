//! CLI command definitions for the `colloquy` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod stream;
pub mod session;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Chat sessions with regenerable, versioned responses.
#[derive(Parser)]
#[command(name = "colloquy", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Write log lines as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true, env = "COLLOQUY_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// List an owner's sessions, most recent first.
    #[command(alias = "ls")]
    Sessions {
        /// Owner id.
        #[arg(long, env = "COLLOQUY_OWNER")]
        owner: String,
    },

    /// Show a session's messages and response variants.
    Show {
        /// Session id.
        session_id: String,

        #[arg(long, env = "COLLOQUY_OWNER")]
        owner: String,
    },

    /// Send one message and stream the answer to the terminal.
    Send {
        /// Message text.
        text: String,

        /// Continue an existing session instead of starting a new one.
        #[arg(long)]
        session: Option<String>,

        #[arg(long, env = "COLLOQUY_OWNER")]
        owner: String,
    },

    /// Regenerate an assistant message and stream the new variant.
    Retry {
        session_id: String,
        message_id: String,

        /// Prompt to use instead of the preceding user message.
        #[arg(long)]
        prompt: Option<String>,

        #[arg(long, env = "COLLOQUY_OWNER")]
        owner: String,
    },

    /// Delete a session.
    #[command(alias = "rm")]
    Delete {
        session_id: String,

        #[arg(long, env = "COLLOQUY_OWNER")]
        owner: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
