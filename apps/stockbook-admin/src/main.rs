//! # Stockbook Admin
//!
//! Operator CLI over the stock engine.
//!
//! ## Commands
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  stockbook [--config FILE] [--database FILE] <command>                 │
//! │                                                                         │
//! │  add-product   register a product with its opening stock               │
//! │  products      list products and current stock                         │
//! │  sell          apply a finalized sale from a JSON payload              │
//! │  adjust        manual correction (inbound / outbound / adjustment)     │
//! │  reverse       compensate one ledger entry                             │
//! │  void          void a sale and reverse its debits                      │
//! │  history       page through a product's ledger                         │
//! │  check         compare aggregates with the ledger                      │
//! │  config        print the effective configuration                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Results go to stdout as JSON; logs go to stderr.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use stockbook_core::MovementType;
use stockbook_db::{Database, StockbookConfig};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "stockbook", version, about = "Stock ledger administration")]
struct Cli {
    /// Configuration file (defaults to the platform config dir).
    #[arg(long, global = true, env = "STOCKBOOK_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overriding the configuration.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register a product with its opening stock.
    AddProduct {
        #[arg(long)]
        id: String,
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 0)]
        stock: i64,
        #[arg(long, default_value_t = 0)]
        min_stock: i64,
    },

    /// List products and current stock.
    Products,

    /// Apply a finalized sale from a JSON file (`-` reads stdin).
    Sell {
        file: PathBuf,
    },

    /// Record a manual stock correction.
    Adjust {
        #[arg(long)]
        product: String,
        /// inbound, outbound or adjustment (absolute count)
        #[arg(long = "type")]
        movement_type: MovementType,
        #[arg(long)]
        quantity: i64,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        actor: Option<String>,
        /// Retry key; reusing it returns the first result.
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        allow_negative: bool,
    },

    /// Reverse one ledger entry.
    Reverse {
        movement_id: String,
        #[arg(long)]
        actor: Option<String>,
    },

    /// Void a sale and reverse every debit it produced.
    Void {
        sale_id: String,
        #[arg(long)]
        actor: Option<String>,
    },

    /// Print a product's ledger, oldest first.
    History {
        product: String,
        #[arg(long, default_value_t = 0)]
        page_size: u32,
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },

    /// Compare stored stock with the ledger. Exits non-zero on divergence.
    Check {
        #[arg(long)]
        product: Option<String>,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let mut config = StockbookConfig::load(cli.config.clone()).context("loading configuration")?;
    if let Some(path) = cli.database {
        config.database.path = path;
    }
    debug!(path = %config.database.path.display(), "Configuration loaded");

    if let Command::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    let db = Database::new(config.db_config())
        .await
        .context("opening database")?;
    let engine = db.engine(config.engine_config());

    let result = commands::run(&engine, cli.command, &mut std::io::stdout()).await;

    db.close().await;
    info!("Done");
    result
}

/// Initializes the tracing subscriber on stderr.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=stockbook_db=trace` - Trace the engine only
/// - Default: INFO, debug for stockbook crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stockbook=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
