//! SQLite storage backend for PointerIndex.
//!
//! Persists event records, pointers, and checkpoints to a single SQLite file.
//! Uses `sqlx` with WAL mode so query readers don't block the indexer.
//!
//! # Usage
//! ```rust,no_run
//! use pointerindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./mirror.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use pointerindex_core::checkpoint::{Checkpoint, CheckpointStore};
use pointerindex_core::error::IndexerError;
use pointerindex_core::pointer::IdentityPointer;
use pointerindex_core::store::{DocumentStore, EventStore, PointerCounts, PointerStore};
use pointerindex_core::types::{EventKind, LedgerEvent};

fn storage_err(e: impl std::fmt::Display) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed document store.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./mirror.db"`) or a full
    /// SQLite URL (`"sqlite:./mirror.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        // One connection: every `:memory:` connection is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                indexer_id   TEXT    NOT NULL PRIMARY KEY,
                block_number INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                tx_hash         TEXT    NOT NULL,
                log_index       INTEGER NOT NULL,
                block_number    INTEGER NOT NULL,
                block_timestamp INTEGER NOT NULL,
                ledger          TEXT    NOT NULL,
                kind            TEXT    NOT NULL,
                identity_hash   TEXT    NOT NULL,
                payload         TEXT    NOT NULL,
                PRIMARY KEY (tx_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pointers (
                identity_hash TEXT    NOT NULL PRIMARY KEY,
                owner         TEXT    NOT NULL,
                active        INTEGER NOT NULL,
                body          TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_events_identity ON events (identity_hash);",
            "CREATE INDEX IF NOT EXISTS idx_events_kind ON events (kind);",
            "CREATE INDEX IF NOT EXISTS idx_pointers_owner ON pointers (owner);",
        ] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }

        Ok(())
    }

    async fn select_events(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Vec<LedgerEvent>, IndexerError> {
        let sql = format!(
            "SELECT tx_hash, log_index, block_number, block_timestamp, ledger, kind, identity_hash, payload
             FROM events WHERE {column} = ? ORDER BY block_number, log_index, tx_hash"
        );
        let rows = sqlx::query(&sql)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(event_from_row).collect()
    }
}

fn event_from_row(row: &SqliteRow) -> Result<LedgerEvent, IndexerError> {
    let kind_str: String = row.get("kind");
    let kind = EventKind::from_signature(&kind_str)
        .ok_or_else(|| storage_err(format!("unknown stored event kind '{kind_str}'")))?;
    let payload: String = row.get("payload");
    Ok(LedgerEvent {
        block_number: row.get::<i64, _>("block_number") as u64,
        tx_hash: row.get("tx_hash"),
        log_index: row.get::<i64, _>("log_index") as u32,
        block_timestamp: row.get("block_timestamp"),
        ledger: row.get("ledger"),
        kind,
        identity_hash: row.get("identity_hash"),
        payload: serde_json::from_str(&payload).map_err(storage_err)?,
    })
}

fn pointer_from_row(row: &SqliteRow) -> Result<IdentityPointer, IndexerError> {
    let body: String = row.get("body");
    serde_json::from_str(&body).map_err(storage_err)
}

// ─── EventStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl EventStore for SqliteStorage {
    async fn insert_event(&self, event: &LedgerEvent) -> Result<bool, IndexerError> {
        let payload = serde_json::to_string(&event.payload).map_err(storage_err)?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO events
             (tx_hash, log_index, block_number, block_timestamp, ledger, kind, identity_hash, payload)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.tx_hash)
        .bind(event.log_index as i64)
        .bind(event.block_number as i64)
        .bind(event.block_timestamp)
        .bind(&event.ledger)
        .bind(event.kind.as_str())
        .bind(&event.identity_hash)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        let inserted = result.rows_affected() == 1;
        debug!(kind = %event.kind, block = event.block_number, inserted, "event stored");
        Ok(inserted)
    }

    async fn events_by_identity(
        &self,
        identity_hash: &str,
    ) -> Result<Vec<LedgerEvent>, IndexerError> {
        self.select_events("identity_hash", identity_hash).await
    }

    async fn events_by_kind(&self, kind: EventKind) -> Result<Vec<LedgerEvent>, IndexerError> {
        self.select_events("kind", kind.as_str()).await
    }

    async fn event_counts(&self) -> Result<BTreeMap<EventKind, u64>, IndexerError> {
        let rows = sqlx::query("SELECT kind, COUNT(*) AS cnt FROM events GROUP BY kind")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let kind_str: String = row.get("kind");
            if let Some(kind) = EventKind::from_signature(&kind_str) {
                counts.insert(kind, row.get::<i64, _>("cnt") as u64);
            }
        }
        Ok(counts)
    }
}

// ─── PointerStore impl ───────────────────────────────────────────────────────

#[async_trait]
impl PointerStore for SqliteStorage {
    async fn get_pointer(
        &self,
        identity_hash: &str,
    ) -> Result<Option<IdentityPointer>, IndexerError> {
        let row = sqlx::query("SELECT body FROM pointers WHERE identity_hash = ?")
            .bind(identity_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(pointer_from_row).transpose()
    }

    async fn put_pointer(&self, pointer: &IdentityPointer) -> Result<(), IndexerError> {
        let body = serde_json::to_string(pointer).map_err(storage_err)?;
        sqlx::query(
            "INSERT OR REPLACE INTO pointers (identity_hash, owner, active, body)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&pointer.identity_hash)
        .bind(pointer.owner.to_ascii_lowercase())
        .bind(pointer.active)
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn pointers_by_owner(&self, owner: &str) -> Result<Vec<IdentityPointer>, IndexerError> {
        let rows = sqlx::query(
            "SELECT body FROM pointers WHERE owner = ? ORDER BY identity_hash",
        )
        .bind(owner.to_ascii_lowercase())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(pointer_from_row).collect()
    }

    async fn pointer_counts(&self) -> Result<PointerCounts, IndexerError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COALESCE(SUM(active), 0) AS active FROM pointers",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(PointerCounts {
            total: row.get::<i64, _>("total") as u64,
            active: row.get::<i64, _>("active") as u64,
        })
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load(&self, indexer_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT indexer_id, block_number, updated_at
             FROM checkpoints WHERE indexer_id = ?",
        )
        .bind(indexer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(|r| Checkpoint {
            indexer_id: r.get("indexer_id"),
            block_number: r.get::<i64, _>("block_number") as u64,
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints (indexer_id, block_number, updated_at)
             VALUES (?, ?, ?)",
        )
        .bind(&checkpoint.indexer_id)
        .bind(checkpoint.block_number as i64)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(
            indexer_id = %checkpoint.indexer_id,
            block = checkpoint.block_number,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn delete(&self, indexer_id: &str) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM checkpoints WHERE indexer_id = ?")
            .bind(indexer_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteStorage {
    async fn ping(&self) -> Result<(), IndexerError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
