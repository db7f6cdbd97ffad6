//! rollsync CLI
//!
//! Command-line tools for local rollsync stores and their backups.
//!
//! # Commands
//!
//! - `backup` - Push the local snapshot to the remote
//! - `restore` - Pull the remote backup into the local store
//! - `sync` - Run one sync cycle
//! - `probe` - Show what the remote holds for an owner
//! - `import` - Merge a snapshot file into the local store
//! - `migrate` - Upgrade a snapshot file to the current schema
//! - `inspect` - Display local store statistics

mod commands;

use clap::{Parser, Subcommand};
use commands::{Context, OutputFormat};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// rollsync backup and sync tools.
#[derive(Parser)]
#[command(name = "rollsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local store file
    #[arg(global = true, short, long, env = "ROLLSYNC_STORE")]
    store: Option<PathBuf>,

    /// Directory acting as the remote document store
    #[arg(global = true, short, long, env = "ROLLSYNC_REMOTE")]
    remote: Option<PathBuf>,

    /// Owner id the backup belongs to
    #[arg(global = true, short, long, env = "ROLLSYNC_OWNER")]
    owner: Option<String>,

    /// Application secret used to derive encryption keys
    #[arg(global = true, long, env = "ROLLSYNC_APP_SECRET", hide_env_values = true)]
    app_secret: Option<String>,

    /// Remote collection holding backup documents
    #[arg(global = true, long, default_value = "backups")]
    collection: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push the local snapshot to the remote
    Backup {
        /// Record the backup as taken before an app update
        #[arg(long)]
        pre_update: bool,

        /// Push plaintext if encryption fails
        #[arg(long)]
        allow_plaintext: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Pull the remote backup into the local store
    Restore {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Run one sync cycle, pulling or pushing as needed
    Sync {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show what the remote holds for the owner
    Probe {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Merge a snapshot file into the local store
    Import {
        /// Snapshot JSON file, any schema version
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Upgrade a snapshot file to the current schema
    Migrate {
        /// Snapshot JSON file to upgrade in place
        file: PathBuf,

        /// Show pending migrations without writing
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Display local store statistics
    Inspect {
        /// List records per collection
        #[arg(short, long)]
        collections: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let ctx = Context {
        store: cli.store,
        remote: cli.remote,
        owner: cli.owner,
        app_secret: cli.app_secret,
        collection: cli.collection,
    };

    match cli.command {
        Commands::Backup {
            pre_update,
            allow_plaintext,
            format,
        } => commands::backup::create(&ctx, pre_update, allow_plaintext, format).await?,
        Commands::Restore { format } => commands::backup::restore(&ctx, format).await?,
        Commands::Sync { format } => commands::sync::run(&ctx, format).await?,
        Commands::Probe { format } => commands::sync::probe(&ctx, format).await?,
        Commands::Import { file, format } => commands::import::run(&ctx, &file, format)?,
        Commands::Migrate { file, dry_run } => commands::migrate::run(&file, dry_run)?,
        Commands::Inspect {
            collections,
            format,
        } => commands::inspect::run(&ctx, collections, format)?,
        Commands::Version => {
            println!("rollsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Snapshot schema v{}",
                rollsync_model::CURRENT_SCHEMA_VERSION
            );
            println!("Envelope format v{}", rollsync_crypto::FORMAT_VERSION);
        }
    }

    Ok(())
}
