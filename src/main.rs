//! # Contact Harvest CLI (`harvester`)
//!
//! Mirrors the remote contact directory into SQLite and inspects the result.
//!
//! ## Usage
//!
//! ```bash
//! harvester --config ./config/harvester.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvester init` | Create the SQLite database and schema |
//! | `harvester sync <target>` | Harvest `contacts`, `groups` or `all` |
//! | `harvester stats` | Counts per kind and the last run of each target |
//! | `harvester get <identifier>` | Print one contact (and a group's members) |
//! | `harvester list` | List stored contacts |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! harvester init --config ./config/harvester.toml
//!
//! # Preview a group harvest without writing
//! harvester sync groups --dry-run
//!
//! # Full harvest with JSON progress for a log collector
//! harvester sync all --progress json
//!
//! # First 50 groups
//! harvester list --kind group --limit 50
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use contact_harvest::harvest::SyncTarget;
use contact_harvest::progress::ProgressMode;
use contact_harvest::{config, get, harvest, logging, migrate, stats};
use contact_harvest_core::models::ContactKind;

/// Contact Harvest CLI: mirror a remote contact directory into SQLite.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/harvester.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "harvester",
    about = "Contact Harvest: mirror a remote contact directory into SQLite",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/harvester.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the contacts, group_members and
    /// harvest_runs tables. Safe to run repeatedly.
    Init,

    /// Harvest the remote directory into the database.
    ///
    /// `contacts` writes every listed identifier; `groups` writes groups and
    /// their members; `all` runs both in that order.
    Sync {
        target: SyncTarget,

        /// Fetch and normalize, but do not write to the database.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr: auto (human on a TTY), off, human, or json.
        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressMode,
    },

    /// Show database statistics.
    Stats,

    /// Print one contact by identifier.
    Get {
        /// Contact identifier (e.g. `wxid_abc` or `123@chatroom`).
        identifier: String,
    },

    /// List stored contacts ordered by display name.
    List {
        /// Only this kind: friend, group or official.
        #[arg(long)]
        kind: Option<ContactKind>,

        /// Maximum number of rows.
        #[arg(long)]
        limit: Option<usize>,

        /// Rows to skip.
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init_tracing(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync {
            target,
            dry_run,
            progress,
        } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, stopping after the current step");
                    on_signal.cancel();
                }
            });
            harvest::run_sync(&cfg, target, dry_run, progress, cancel).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Get { identifier } => {
            get::run_get(&cfg, &identifier).await?;
        }
        Commands::List {
            kind,
            limit,
            offset,
        } => {
            get::run_list(&cfg, kind, limit, offset).await?;
        }
    }

    Ok(())
}
