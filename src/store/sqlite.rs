use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;

use super::{SnapshotStore, StoreError};
use crate::model::{PersistedRecord, Snapshot, Symbol};

pub type Db = Arc<Mutex<Connection>>;

/// Snapshots in a single sqlite table. The payload is stored as JSON; the
/// symbol and storage time are columns so ordering stays in the index.
#[derive(Clone)]
pub struct SqliteStore {
    db: Db,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).context("creating db directory")?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("opening sqlite at {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        migrate(&conn)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory sqlite")?;
        migrate(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS snapshots (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol            TEXT NOT NULL,
            timestamp         INTEGER NOT NULL,
            source_timestamp  TEXT,
            payload           TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS snapshots_symbol_time
            ON snapshots (symbol, timestamp);
        ",
    )?;
    Ok(())
}

type RawRow = (i64, String, i64, String);

fn decode(raw: RawRow) -> Result<PersistedRecord, StoreError> {
    let (id, symbol, timestamp, payload) = raw;
    let corrupt = |reason: String| StoreError::Corrupt { id, reason };

    let symbol: Symbol = symbol.parse().map_err(|e| corrupt(format!("{e}")))?;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(timestamp)
        .ok_or_else(|| corrupt(format!("timestamp {timestamp} out of range")))?;
    let payload: Snapshot =
        serde_json::from_str(&payload).map_err(|e| corrupt(format!("payload: {e}")))?;

    Ok(PersistedRecord {
        id: Some(id),
        symbol,
        timestamp,
        payload,
    })
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn latest(&self, symbol: Symbol) -> Result<Option<PersistedRecord>, StoreError> {
        let conn = self.db.lock().await;
        let raw = conn
            .query_row(
                "SELECT id, symbol, timestamp, payload FROM snapshots
                 WHERE symbol = ?1 ORDER BY timestamp DESC, id DESC LIMIT 1",
                [symbol.as_str()],
                read_row,
            )
            .optional()?;
        raw.map(decode).transpose()
    }

    async fn history(
        &self,
        symbol: Symbol,
        limit: Option<usize>,
    ) -> Result<Vec<PersistedRecord>, StoreError> {
        let conn = self.db.lock().await;
        // sqlite treats a negative LIMIT as unbounded.
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let mut stmt = conn.prepare(
            "SELECT id, symbol, timestamp, payload FROM snapshots
             WHERE symbol = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;
        let raws = stmt
            .query_map(params![symbol.as_str(), limit], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut records = raws.into_iter().map(decode).collect::<Result<Vec<_>, _>>()?;
        records.reverse();
        Ok(records)
    }

    async fn append(&self, mut record: PersistedRecord) -> Result<PersistedRecord, StoreError> {
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| StoreError::Unavailable(format!("encoding payload: {e}")))?;
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO snapshots (symbol, timestamp, source_timestamp, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.symbol.as_str(),
                record.timestamp.timestamp_millis(),
                record.payload.source_timestamp,
                payload,
            ],
        )?;
        record.id = Some(conn.last_insert_rowid());
        Ok(record)
    }

    async fn count(&self, symbol: Symbol) -> Result<usize, StoreError> {
        let conn = self.db.lock().await;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM snapshots WHERE symbol = ?1",
            [symbol.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    async fn delete(&self, ids: &[i64]) -> Result<usize, StoreError> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM snapshots WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let conn = self.db.lock().await;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}
