use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::server::registry::GENERAL_PASTEBOARD;
use crate::server::types::TEXT;

#[derive(Parser)]
#[command(name = "pasteboardd", about = "Named pasteboards shared between processes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the pasteboard server
    Serve {
        /// Socket path (default: $XDG_RUNTIME_DIR/pasteboard/server.sock)
        #[arg(long)]
        socket: Option<PathBuf>,

        /// How long a reader waits for an owner to provide data
        #[arg(long, default_value_t = 5000)]
        callback_timeout_ms: u64,

        /// Generations retained per new pasteboard (0 = none)
        #[arg(long, default_value_t = 0)]
        history: u32,
    },

    /// Talk to a running server
    Client {
        /// Socket path (default: $XDG_RUNTIME_DIR/pasteboard/server.sock)
        #[arg(long, global = true)]
        socket: Option<PathBuf>,

        #[command(subcommand)]
        action: ClientAction,
    },
}

#[derive(Subcommand)]
pub enum ClientAction {
    /// List pasteboards
    List,

    /// Show declared types and change count
    Types {
        #[arg(short, long, default_value = GENERAL_PASTEBOARD)]
        pasteboard: String,
    },

    /// Write data for a type to stdout
    Get {
        #[arg(short, long, default_value = GENERAL_PASTEBOARD)]
        pasteboard: String,

        #[arg(short = 't', long = "type", default_value = TEXT)]
        type_name: String,

        /// Generation to read (default: current)
        #[arg(long)]
        count: Option<u64>,

        /// Allow reading a retained older generation
        #[arg(long, requires = "count")]
        history: bool,
    },

    /// Take ownership and store data read from stdin or a file
    Copy {
        #[arg(short, long, default_value = GENERAL_PASTEBOARD)]
        pasteboard: String,

        #[arg(short = 't', long = "type", default_value = TEXT)]
        type_name: String,

        /// Have the server read the payload from this file
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Take ownership and provide data on demand until replaced
    Offer {
        #[arg(short, long, default_value = GENERAL_PASTEBOARD)]
        pasteboard: String,

        /// Types to declare
        #[arg(short = 't', long = "type", default_value = TEXT)]
        types: Vec<String>,

        /// Payload served for every requested type
        #[arg(long)]
        file: PathBuf,
    },

    /// Print a line each time ownership changes
    Watch {
        #[arg(short, long, default_value = GENERAL_PASTEBOARD)]
        pasteboard: String,
    },

    /// Set how many past generations are retained
    History {
        #[arg(short, long, default_value = GENERAL_PASTEBOARD)]
        pasteboard: String,

        depth: u32,
    },

    /// Drop the current owner
    Release {
        #[arg(short, long, default_value = GENERAL_PASTEBOARD)]
        pasteboard: String,
    },

    /// Create a pasteboard with a fresh unique name
    Unique,
}
