//! PointerIndex CLI: inspect and manage an identity-pointer mirror.
//!
//! # Commands
//! ```bash
//! pointerindex status  --db mirror.db
//! pointerindex pointer --db mirror.db --identity x:abc
//! pointerindex events  --db mirror.db --hash 0x1f... --kind Updated
//! pointerindex replay  --db mirror.db --events dump.json --config indexer.json
//! pointerindex reset   --db mirror.db --id pointer-mirror
//! pointerindex info
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use serde::Deserialize;

use pointerindex_core::checkpoint::CheckpointManager;
use pointerindex_core::indexer::IndexerConfig;
use pointerindex_core::query::MirrorQuery;
use pointerindex_core::source::LedgerEventSource;
use pointerindex_core::types::{EventKind, LedgerEvent, RawLedgerEvent};
use pointerindex_storage::SqliteStorage;
use pointerindex_sync::{IndexerBuilder, MemoryLedgerSource, ReconcileOutcome, ScanReport};

mod logging;

use logging::{init_tracing, LogConfig};

#[derive(Parser)]
#[command(
    name = "pointerindex",
    about = "Off-chain mirror of identity-ledger pointers",
    long_about = "
PointerIndex CLI: inspect the mirrored identity pointers and their event
records, replay JSON event dumps into a mirror, and reset checkpoints.

ENVIRONMENT VARIABLES:
  RUST_LOG    Log filter; overrides --log-level
",
    version
)]
struct Cli {
    /// Log level: trace | debug | info | warn | error
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show checkpoint, event counts and pointer counts
    Status {
        /// Path to the SQLite mirror database
        #[arg(long)]
        db: String,
        /// Indexer ID whose checkpoint to show
        #[arg(long, default_value = "pointer-mirror")]
        id: String,
    },

    /// Look up identity pointers
    #[command(group(ArgGroup::new("lookup").required(true).args(["identity", "hash", "owner"])))]
    Pointer {
        #[arg(long)]
        db: String,
        /// Identity string (hashed before lookup)
        #[arg(long)]
        identity: Option<String>,
        /// Identity hash (0x-prefixed hex)
        #[arg(long)]
        hash: Option<String>,
        /// List every pointer held by this owner
        #[arg(long)]
        owner: Option<String>,
    },

    /// List event records by identity and/or kind
    #[command(group(ArgGroup::new("target").args(["identity", "hash"])))]
    Events {
        #[arg(long)]
        db: String,
        #[arg(long)]
        identity: Option<String>,
        #[arg(long)]
        hash: Option<String>,
        /// Event kind, e.g. Created, DataStored, AccessGranted
        #[arg(long)]
        kind: Option<EventKind>,
    },

    /// Apply a JSON array of raw ledger events to a mirror
    Replay {
        #[arg(long)]
        db: String,
        /// JSON file holding an array of raw ledger events
        #[arg(long)]
        events: PathBuf,
        /// Indexer config file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Identity ledger address (overrides the config file)
        #[arg(long)]
        identity_ledger: Option<String>,
        /// Data ledger address (overrides the config file)
        #[arg(long)]
        data_ledger: Option<String>,
        /// Scan from this block instead of resuming from the checkpoint
        #[arg(long)]
        from: Option<u64>,
    },

    /// Delete an indexer's checkpoint so the next run starts from the lookback window
    Reset {
        #[arg(long)]
        db: String,
        #[arg(long, default_value = "pointer-mirror")]
        id: String,
    },

    /// Show defaults and supported event kinds
    Info,
}

/// Config file layout: indexer settings plus an optional `log` section.
#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(flatten)]
    indexer: IndexerConfig,
    #[serde(default)]
    log: Option<LogConfig>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_config = match &cli.command {
        Commands::Replay {
            config: Some(path), ..
        } => Some(load_config(path)?),
        _ => None,
    };
    let log = file_config
        .as_ref()
        .and_then(|c| c.log.clone())
        .unwrap_or_else(|| LogConfig {
            level: cli.log_level.clone(),
            json: cli.json_logs,
            ..Default::default()
        });
    init_tracing(&log);

    match cli.command {
        Commands::Status { db, id } => cmd_status(&db, &id).await,

        Commands::Pointer {
            db,
            identity,
            hash,
            owner,
        } => cmd_pointer(&db, identity.as_deref(), hash.as_deref(), owner.as_deref()).await,

        Commands::Events {
            db,
            identity,
            hash,
            kind,
        } => cmd_events(&db, identity.as_deref(), hash.as_deref(), kind).await,

        Commands::Replay {
            db,
            events,
            identity_ledger,
            data_ledger,
            from,
            ..
        } => {
            let mut config = file_config.map(|c| c.indexer).unwrap_or_default();
            if identity_ledger.is_some() {
                config.identity_ledger = identity_ledger;
            }
            if data_ledger.is_some() {
                config.data_ledger = data_ledger;
            }
            cmd_replay(&db, &events, config, from).await
        }

        Commands::Reset { db, id } => cmd_reset(&db, &id).await,

        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

async fn open_store(db: &str) -> Result<Arc<SqliteStorage>> {
    let store = SqliteStorage::open(db)
        .await
        .with_context(|| format!("opening mirror database '{db}'"))?;
    Ok(Arc::new(store))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_events(events: &[LedgerEvent]) -> Result<()> {
    for event in events {
        println!("{}", serde_json::to_string(event)?);
    }
    eprintln!("{} event(s)", events.len());
    Ok(())
}

fn print_report(report: &ScanReport) {
    println!("Scanned blocks {}..={}", report.from, report.to);
    println!("  Events:  {}", report.events);
    println!("  Applied: {}", report.applied);
    println!("  Skipped: {}", report.skipped);
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn cmd_status(db: &str, id: &str) -> Result<()> {
    let store = open_store(db).await?;
    let stats = MirrorQuery::new(store, id).stats().await?;

    println!("Mirror '{id}' ({db})");
    match stats.checkpoint {
        Some(height) => println!("  Checkpoint:      block {height}"),
        None => println!("  Checkpoint:      none"),
    }
    println!("  Pointers:        {} ({} active)", stats.pointers, stats.active_pointers);
    println!("  Event records:   {}", stats.total_events);
    for (kind, count) in &stats.events_by_kind {
        println!("    {:<18} {count}", kind.to_string());
    }
    Ok(())
}

async fn cmd_pointer(
    db: &str,
    identity: Option<&str>,
    hash: Option<&str>,
    owner: Option<&str>,
) -> Result<()> {
    let query = MirrorQuery::new(open_store(db).await?, "pointer-mirror");

    if let Some(owner) = owner {
        let pointers = query.pointers_by_owner(owner).await?;
        return print_json(&pointers);
    }

    let pointer = match (identity, hash) {
        (Some(identity), _) => query.pointer(identity).await?,
        (None, Some(hash)) => query.pointer_by_hash(hash).await?,
        (None, None) => bail!("one of --identity, --hash or --owner is required"),
    };
    match pointer {
        Some(pointer) => print_json(&pointer),
        None => bail!("no pointer found"),
    }
}

async fn cmd_events(
    db: &str,
    identity: Option<&str>,
    hash: Option<&str>,
    kind: Option<EventKind>,
) -> Result<()> {
    let query = MirrorQuery::new(open_store(db).await?, "pointer-mirror");

    let events = match (identity, hash) {
        (Some(identity), _) => query.events_by_identity(identity).await?,
        (None, Some(hash)) => query.events_by_identity_hash(hash).await?,
        (None, None) => match kind {
            Some(kind) => return print_events(&query.events_by_kind(kind).await?),
            None => bail!("pass --identity, --hash or --kind"),
        },
    };
    let events: Vec<_> = events
        .into_iter()
        .filter(|e| kind.map_or(true, |k| e.kind == k))
        .collect();
    print_events(&events)
}

async fn cmd_replay(
    db: &str,
    events_path: &Path,
    mut config: IndexerConfig,
    from: Option<u64>,
) -> Result<()> {
    if config.identity_ledger.is_none() && config.data_ledger.is_none() {
        bail!("no ledger configured: pass --identity-ledger / --data-ledger or --config");
    }
    config.live = false;

    let text = std::fs::read_to_string(events_path)
        .with_context(|| format!("reading {}", events_path.display()))?;
    let events: Vec<RawLedgerEvent> = serde_json::from_str(&text)
        .with_context(|| format!("parsing {} as a raw event array", events_path.display()))?;
    tracing::info!(events = events.len(), file = %events_path.display(), "loaded event dump");

    let source: Arc<dyn LedgerEventSource> = Arc::new(MemoryLedgerSource::from_events(events));
    let store = open_store(db).await?;
    let indexer = IndexerBuilder::from_config(config).build(source, store)?;

    match from {
        Some(from) => {
            let head = indexer.scanner().head().await?;
            print_report(&indexer.scanner().scan(from, head).await?);
        }
        None => match indexer.reconcile_now().await? {
            ReconcileOutcome::Scanned(report) => print_report(&report),
            ReconcileOutcome::UpToDate { head } => {
                println!("Mirror already at block {head}; nothing to replay")
            }
        },
    }

    let metrics = indexer.metrics();
    println!(
        "  Duplicates: {}  Unrecognized: {}  Malformed: {}",
        metrics.duplicates, metrics.skipped_unknown, metrics.skipped_malformed
    );
    Ok(())
}

async fn cmd_reset(db: &str, id: &str) -> Result<()> {
    let store = open_store(db).await?;
    let manager = CheckpointManager::new(store, id, IndexerConfig::default().lookback_window);
    match manager.stored().await? {
        Some(height) => {
            manager.reset().await?;
            println!("Checkpoint for '{id}' reset (was block {height})");
        }
        None => println!("No checkpoint stored for '{id}'"),
    }
    Ok(())
}

fn cmd_info() {
    let defaults = IndexerConfig::default();
    println!("PointerIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default indexer ID:          {}", defaults.id);
    println!("  Default lookback window:     {} blocks", defaults.lookback_window);
    println!("  Default batch size:          {} blocks/query", defaults.batch_size);
    println!("  Default reconcile interval:  {}s", defaults.reconcile_interval_secs);
    println!("  Default ledger call timeout: {}ms", defaults.rpc_timeout_ms);
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
    println!("  Event kinds:");
    for kind in EventKind::ALL {
        println!("    {:<18} ({:?} ledger)", kind.to_string(), kind.family());
    }
}
