//! Command-line argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Ferry file transfer client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Signaling server address (host:port), overriding the config file
    #[arg(short, long, global = true)]
    pub server: Option<String>,

    /// Directory received files are saved to
    #[arg(short, long, global = true)]
    pub out: Option<PathBuf>,

    /// Settings file to use instead of the platform default
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true, default_value = "false")]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a room and send a file
    Send {
        file: PathBuf,

        /// Continue an interrupted send of this file
        #[arg(long)]
        resume: bool,
    },
    /// Join a room and receive its file
    Receive {
        /// Room code shown by the sender
        code: String,

        /// Continue an interrupted receive from this room
        #[arg(long)]
        resume: bool,
    },
    /// Send a file to yourself through the server
    Copy { file: PathBuf },
    /// Show finished transfers
    History {
        /// Forget all recorded transfers
        #[arg(long)]
        clear: bool,
    },
    /// Show resumable transfers
    Checkpoints {
        /// Discard every checkpoint
        #[arg(long)]
        clear: bool,
    },
}
