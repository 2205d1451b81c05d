//! Relog CLI
//!
//! Offline tools for inspecting transaction history logs.
//!
//! # Commands
//!
//! - `inspect` - Display the segment catalog and sequence number ranges
//! - `dump` - Decode and print events from one segment file
//! - `verify` - Check catalog integrity and record checksums

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Relog command-line log tools.
#[derive(Parser)]
#[command(name = "relog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the segment catalog and sequence number ranges
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Decode and print events from one segment file
    Dump {
        /// Segment file name (defaults to the oldest segment)
        #[arg(short = 'F', long)]
        file: Option<String>,

        /// Maximum number of events to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check catalog integrity and record checksums
    Verify {
        /// Stop at the first damaged record instead of scanning every file
        #[arg(short, long)]
        fail_fast: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let path = cli.path.unwrap_or_else(|| PathBuf::from("."));

    let result = match cli.command {
        Commands::Inspect { format } => commands::inspect::run(&path, &format),
        Commands::Dump {
            file,
            limit,
            format,
        } => commands::dump::run(&path, file.as_deref(), limit, &format),
        Commands::Verify { fail_fast } => commands::verify::run(&path, fail_fast),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
