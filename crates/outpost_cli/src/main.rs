//! Outpost CLI
//!
//! Maintenance tools for an Outpost client store.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics and markers
//! - `verify` - Run a forced maintenance (FSCK) pass
//! - `migrate` - Show or apply pending protocol migrations
//! - `reset` - Wipe the store so the client resyncs
//! - `dump-wal` - Dump WAL records for debugging

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Outpost client store tools.
#[derive(Parser)]
#[command(name = "outpost")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Application base directory (the one containing `Library/`)
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
    /// Display store statistics and markers
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run a forced maintenance pass, repairing what can be repaired
    Verify,

    /// Protocol migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },

    /// Delete the store; the client resyncs on next launch
    Reset {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Dump WAL records for debugging
    DumpWal {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Show the stored version and pending migrations
    Status,
    /// Apply pending migrations
    Run {
        /// Only list what would run
        #[arg(short, long)]
        dry_run: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Base path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Base path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Migrate { action } => {
            let path = cli.path.ok_or("Base path required for migrate")?;
            match action {
                MigrateAction::Status => commands::migrate::status(&path)?,
                MigrateAction::Run { dry_run } => commands::migrate::run(&path, dry_run)?,
            }
        }
        Commands::Reset { yes } => {
            let path = cli.path.ok_or("Base path required for reset")?;
            commands::reset::run(&path, yes)?;
        }
        Commands::DumpWal { limit, format } => {
            let path = cli.path.ok_or("Base path required for dump-wal")?;
            commands::dump_wal::run(&path, limit, &format)?;
        }
        Commands::Version => {
            println!("Outpost CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Outpost Core v{}", outpost_core::VERSION);
            println!("Protocol {}", outpost_core::ProtocolVersion::CURRENT);
        }
    }

    Ok(())
}
