//! Record store: the final arbiter of uniqueness
//!
//! The ingestion pipeline talks to persistence only through the
//! [`RecordStore`] trait:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  IdempotentPipeline                         │
//! │         exists(key) -> insert(record) -> outcome            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     RecordStore                             │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                     │
//!                    ▼                     ▼
//!          ┌─────────────────┐   ┌─────────────────┐
//!          │     SQLite      │   │     Memory      │
//!          │  (production)   │   │    (tests)      │
//!          └─────────────────┘   └─────────────────┘
//! ```
//!
//! Both implementations enforce a unique idempotency key. A second insert
//! with the same key reports [`InsertOutcome::UniqueViolation`] instead of
//! failing, so concurrent or repeated cycles never produce two records.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::models::{IdempotencyKey, NewsRecord};
use crate::scheduler::resources::Resource;
use crate::utils::error::StoreError;

// ============================================================================
// Core Types
// ============================================================================

/// Result of an insert attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record is now stored
    Inserted,
    /// A record with the same key already existed; nothing changed
    UniqueViolation,
}

/// Per-source record counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceCount {
    pub source: String,
    pub records: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Repository Trait
// ============================================================================

/// Persistence contract for ingested records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Cheap existence check; may race with concurrent inserts
    async fn exists(&self, key: &IdempotencyKey) -> Result<bool, StoreError>;

    /// Insert `record` unless its key is already present
    ///
    /// Any error other than a uniqueness violation leaves the store unchanged.
    async fn insert(&self, record: &NewsRecord) -> Result<InsertOutcome, StoreError>;

    /// Total stored records
    async fn count(&self) -> Result<u64, StoreError>;

    /// Record counts and last run time per source
    async fn source_counts(&self) -> Result<Vec<SourceCount>, StoreError>;

    /// Remember when `source` last completed a cycle
    async fn record_run(&self, source: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// When `source` last completed a cycle
    async fn last_run(&self, source: &str) -> Result<Option<DateTime<Utc>>, StoreError>;
}

/// Shared record store handle
pub type SharedRecordStore = Arc<dyn RecordStore>;

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`RecordStore`]
///
/// The connection sits behind a `Mutex` and every query runs on the
/// blocking pool. [`Resource::close`] releases the connection; later calls
/// fail with [`StoreError::Closed`].
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteRecordStore {
    /// Open (or create) the database at `path`
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::create_schema(&conn)?;

        tracing::info!(path = %path.display(), "SQLite record store initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    fn create_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS news (
                    id TEXT PRIMARY KEY,
                    idempotency_key TEXT NOT NULL UNIQUE,
                    source TEXT NOT NULL,
                    title TEXT NOT NULL,
                    url TEXT,
                    body TEXT,
                    summary TEXT,
                    category TEXT,
                    raw_category TEXT,
                    published_at TEXT,
                    image_url TEXT,
                    content_hash TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_news_source
                    ON news(source);

                CREATE TABLE IF NOT EXISTS news_sources (
                    name TEXT PRIMARY KEY,
                    last_run_at TEXT NOT NULL
                );
                "#,
        )?;

        Ok(())
    }

    /// Run `op` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            let conn = guard.as_mut().ok_or(StoreError::Closed)?;
            op(conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Whether `err` is a UNIQUE or PRIMARY KEY constraint failure
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => matches!(
            failure.extended_code,
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        ),
        _ => false,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn exists(&self, key: &IdempotencyKey) -> Result<bool, StoreError> {
        let key = key.as_str().to_string();
        self.with_conn(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM news WHERE idempotency_key = ?1)",
                params![key],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    async fn insert(&self, record: &NewsRecord) -> Result<InsertOutcome, StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let result = tx.execute(
                r#"
                    INSERT INTO news (
                        id, idempotency_key, source, title, url, body, summary,
                        category, raw_category, published_at, image_url, content_hash, created_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                    "#,
                params![
                    record.id.to_string(),
                    record.key.as_str(),
                    record.source,
                    record.title,
                    record.url,
                    record.body,
                    record.summary,
                    record.category,
                    record.raw_category,
                    record.published_at,
                    record.image_url,
                    record.content_hash,
                    record.created_at.to_rfc3339(),
                ],
            );

            // Dropping `tx` without commit rolls back.
            match result {
                Ok(_) => {
                    tx.commit()?;
                    Ok(InsertOutcome::Inserted)
                }
                Err(e) if is_unique_violation(&e) => Ok(InsertOutcome::UniqueViolation),
                Err(e) => Err(StoreError::Database(e)),
            }
        })
        .await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM news", [], |row| row.get(0))?;
            Ok(total.max(0) as u64)
        })
        .await
    }

    async fn source_counts(&self) -> Result<Vec<SourceCount>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                    SELECT s.name, COALESCE(n.records, 0), s.last_run_at
                    FROM (
                        SELECT name, last_run_at FROM news_sources
                        UNION
                        SELECT DISTINCT source, NULL FROM news
                        WHERE source NOT IN (SELECT name FROM news_sources)
                    ) s
                    LEFT JOIN (
                        SELECT source, COUNT(*) AS records FROM news GROUP BY source
                    ) n ON n.source = s.name
                    ORDER BY s.name
                    "#,
            )?;

            let rows = stmt
                .query_map([], |row| {
                    let last_run: Option<String> = row.get(2)?;
                    Ok(SourceCount {
                        source: row.get(0)?,
                        records: row.get::<_, i64>(1)?.max(0) as u64,
                        last_run_at: last_run.as_deref().and_then(parse_timestamp),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
        .await
    }

    async fn record_run(&self, source: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let source = source.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                    INSERT INTO news_sources (name, last_run_at) VALUES (?1, ?2)
                    ON CONFLICT(name) DO UPDATE SET last_run_at = excluded.last_run_at
                    "#,
                params![source, at.to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn last_run(&self, source: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let source = source.to_string();
        self.with_conn(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT last_run_at FROM news_sources WHERE name = ?1",
                    params![source],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(raw.as_deref().and_then(parse_timestamp))
        })
        .await
    }
}

#[async_trait]
impl Resource for SqliteRecordStore {
    fn name(&self) -> &str {
        "record-store"
    }

    async fn close(&self) -> anyhow::Result<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let taken = conn
                .lock()
                .map_err(|_| anyhow::anyhow!("record store lock poisoned"))?
                .take();

            if let Some(conn) = taken {
                conn.close().map_err(|(_, e)| anyhow::Error::new(e))?;
                tracing::debug!("SQLite record store closed");
            }
            Ok(())
        })
        .await?
    }
}

// ============================================================================
// In-Memory Implementation (for testing)
// ============================================================================

/// In-memory [`RecordStore`] with the same uniqueness semantics as SQLite
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<IdempotencyKey, NewsRecord>>,
    runs: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored record for `key`, if any
    pub fn get(&self, key: &IdempotencyKey) -> Option<NewsRecord> {
        self.records
            .read()
            .ok()
            .and_then(|records| records.get(key).cloned())
    }

    /// All stored records, ordered by key
    pub fn records(&self) -> Vec<NewsRecord> {
        let mut all: Vec<NewsRecord> = self
            .records
            .read()
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn exists(&self, key: &IdempotencyKey) -> Result<bool, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.contains_key(key))
    }

    async fn insert(&self, record: &NewsRecord) -> Result<InsertOutcome, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        if records.contains_key(&record.key) {
            return Ok(InsertOutcome::UniqueViolation);
        }
        records.insert(record.key.clone(), record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.len() as u64)
    }

    async fn source_counts(&self) -> Result<Vec<SourceCount>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        let runs = self.runs.read().map_err(|_| StoreError::LockPoisoned)?;

        let mut counts: HashMap<String, u64> = runs.keys().map(|s| (s.clone(), 0)).collect();
        for record in records.values() {
            *counts.entry(record.source.clone()).or_default() += 1;
        }

        let mut result: Vec<SourceCount> = counts
            .into_iter()
            .map(|(source, records)| SourceCount {
                last_run_at: runs.get(&source).copied(),
                source,
                records,
            })
            .collect();
        result.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(result)
    }

    async fn record_run(&self, source: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut runs = self.runs.write().map_err(|_| StoreError::LockPoisoned)?;
        runs.insert(source.to_string(), at);
        Ok(())
    }

    async fn last_run(&self, source: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let runs = self.runs.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(runs.get(source).copied())
    }
}

// ============================================================================
// Tests
// ============================================================================
