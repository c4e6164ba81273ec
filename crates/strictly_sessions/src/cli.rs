//! Command-line interface for strictly_sessions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Strictly Sessions - play shared tic-tac-toe from the terminal
#[derive(Parser, Debug)]
#[command(name = "strictly_sessions")]
#[command(about = "Shared tic-tac-toe sessions over a document store", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to the TOML config file (defaults apply if it does not exist)
    #[arg(short, long, default_value = "strictly_sessions.toml", global = true)]
    pub config: PathBuf,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a two-player session and wait for an opponent
    Create,

    /// Create a solo session where you play both marks
    Solo,

    /// Join a waiting session as O
    Join {
        /// Session ID
        id: String,
    },

    /// Place your mark on a cell (1-9, as numbered on the board)
    Move {
        /// Session ID
        id: String,

        /// Cell number
        #[arg(value_parser = clap::value_parser!(u8).range(1..=9))]
        cell: u8,
    },

    /// Start a new round with the same players
    Restart {
        /// Session ID
        id: String,
    },

    /// Print the current board and status
    Show {
        /// Session ID
        id: String,
    },

    /// Follow a session live until interrupted
    Watch {
        /// Session ID
        id: String,
    },

    /// List sessions waiting for an opponent
    Open {
        /// Maximum number of sessions to list
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print the local player identity
    Whoami,
}
