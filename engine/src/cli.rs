//! CLI interface for Pilot
//!
//! This module provides the command-line interface using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pilot coding agent
///
/// Runs a model against your working directory, letting it read, search and
/// change files and run commands after you approve them.
#[derive(Parser, Debug)]
#[command(name = "pilot")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a message to the agent and stream its answer
    Run {
        /// The message to send
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,

        /// Continue an existing session instead of starting a new one
        #[arg(long, value_name = "ID")]
        session: Option<String>,

        /// Agent profile (build, plan)
        #[arg(long, default_value = "build")]
        agent: String,

        /// Approve every capability call without asking
        #[arg(long)]
        auto_approve: bool,

        /// Override the iteration limit
        #[arg(long, value_name = "N")]
        max_iterations: Option<usize>,

        /// Never prompt; calls that need approval are denied
        #[arg(long)]
        non_interactive: bool,

        /// Working directory for capabilities (default: current directory)
        #[arg(long, value_name = "DIR")]
        directory: Option<PathBuf>,
    },

    /// Chat with the agent turn by turn in one session
    Repl {
        /// Continue an existing session instead of starting a new one
        #[arg(long, value_name = "ID", conflicts_with = "resume")]
        session: Option<String>,

        /// Continue the most recently updated session
        #[arg(long = "continue")]
        resume: bool,

        /// Agent profile (build, plan)
        #[arg(long, default_value = "build")]
        agent: String,

        /// Approve every capability call without asking
        #[arg(long)]
        auto_approve: bool,

        /// Override the iteration limit
        #[arg(long, value_name = "N")]
        max_iterations: Option<usize>,

        /// Working directory for capabilities (default: current directory)
        #[arg(long, value_name = "DIR")]
        directory: Option<PathBuf>,
    },

    /// List sessions, newest first
    Sessions {
        /// Number of sessions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show the messages of a session
    History {
        /// Session to show
        session_id: String,

        /// Number of most recent messages to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show message counts and timestamps of a session
    Stats {
        /// Session to inspect
        session_id: String,
    },

    /// Change the title of a session
    Rename {
        session_id: String,

        /// New title
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
    },

    /// Delete every message of a session but keep the session
    Clear {
        session_id: String,
    },

    /// Delete a session and its messages
    Delete {
        session_id: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
