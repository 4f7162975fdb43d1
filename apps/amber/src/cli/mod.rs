//! # Amber CLI Module
//!
//! ## Available Commands
//!
//! - `status` - List namespaces and their entries (the default)
//! - `show` - Print a namespace, or one entry of it, as JSON
//! - `keys` - List the entries of a namespace
//! - `delete` - Remove one entry from a namespace
//! - `clear` - Drop a whole namespace
//! - `init` - Create an empty database

mod commands;

use amber_core::{AmberError, StoreConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Amber - persisted state inspector
///
/// Reads and maintains the namespaces an Amber store writes to a redb file.
/// Entries are shown as stored, with their type envelopes intact.
#[derive(Parser, Debug)]
#[command(name = "amber")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the redb database
    #[arg(short = 'D', long, global = true, default_value = "amber.redb")]
    pub database: PathBuf,

    /// Namespace to operate on; overrides the config file
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Store configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List namespaces and their entries
    Status,

    /// Print a namespace, or one entry of it
    Show {
        /// Entry to print; the whole namespace if omitted
        key: Option<String>,
    },

    /// List the entries of a namespace
    Keys,

    /// Remove one entry from a namespace
    Delete {
        /// Entry to remove
        key: String,
    },

    /// Drop a whole namespace
    Clear,

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// The namespace to use: `--namespace`, then the config file, then the
    /// default.
    pub fn resolve_namespace(&self) -> Result<String, AmberError> {
        if let Some(namespace) = &self.namespace {
            return Ok(namespace.clone());
        }
        let config = match &self.config {
            Some(path) => StoreConfig::load(path)?,
            None => StoreConfig::default(),
        };
        Ok(config.namespace)
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), AmberError> {
    let json_mode = cli.json_mode;

    match &cli.command {
        Some(Commands::Init { force }) => cmd_init(&cli.database, *force),
        Some(Commands::Status) | None => cmd_status(&cli.database, json_mode),
        Some(Commands::Show { key }) => {
            let namespace = cli.resolve_namespace()?;
            cmd_show(&cli.database, &namespace, key.as_deref())
        }
        Some(Commands::Keys) => {
            let namespace = cli.resolve_namespace()?;
            cmd_keys(&cli.database, &namespace, json_mode)
        }
        Some(Commands::Delete { key }) => {
            let namespace = cli.resolve_namespace()?;
            cmd_delete(&cli.database, &namespace, key, json_mode)
        }
        Some(Commands::Clear) => {
            let namespace = cli.resolve_namespace()?;
            cmd_clear(&cli.database, &namespace, json_mode)
        }
    }
}
