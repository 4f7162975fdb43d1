//! # Amber - State Inspector
//!
//! The binary for inspecting and maintaining persisted Amber namespaces.
//!
//! ## Usage
//!
//! ```bash
//! # Overview of every namespace in the database
//! amber -D save.redb
//!
//! # One namespace, or one entry of it
//! amber -D save.redb -n savegame show
//! amber -D save.redb -n savegame show state
//!
//! # Maintenance
//! amber -D save.redb -n savegame delete state
//! amber -D save.redb -n savegame clear
//! amber -D save.redb init --force
//! ```

use amber::cli;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // AMBER_LOG_FORMAT=json switches to machine-parseable output.
    let log_format = std::env::var("AMBER_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let cli = cli::Cli::parse();

    let default_filter = if cli.verbose {
        "amber=debug,amber_core=debug"
    } else {
        "amber=info,amber_core=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!("amber v{} - persisted state inspector", env!("CARGO_PKG_VERSION"));
    println!();
}
