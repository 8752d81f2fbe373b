// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite storage backend for the durable page store.
//!
//! One row per lead, tagged with the page it was last fetched into:
//! ```sql
//! CREATE TABLE leads (
//!   id TEXT PRIMARY KEY,
//!   page INTEGER,               -- NULL for records never fetched as part of a page
//!   position INTEGER NOT NULL,  -- order within the page
//!   updated_at INTEGER NOT NULL,
//!   sync_status TEXT NOT NULL,  -- synced | pending | failed
//!   fetched_at INTEGER NOT NULL,
//!   payload TEXT NOT NULL       -- LeadRecord as JSON
//! )
//! ```
//!
//! Keeping a single page tag per row is deliberate denormalization: evicting
//! a page is one `DELETE ... WHERE page = ?` and never touches records that
//! were re-fetched into a later page.
//!
//! ## Stale-write guard
//!
//! With `reject_stale_updates` on, an upsert only replaces the payload when
//! the incoming `updated_at` is not older than the stored one. The page tag
//! always moves to the latest page.

use std::str::FromStr;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::{debug, info, warn};

use crate::config::LeadSyncConfig;
use crate::lead::{LeadRecord, SyncStatus, now_millis};
use crate::resilience::retry::{retry, RetryConfig};
use super::traits::{PageStore, RemoteTotals, StorageError};

const IN_MEMORY_URL: &str = "sqlite::memory:";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS leads (
        id TEXT PRIMARY KEY,
        page INTEGER,
        position INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL,
        sync_status TEXT NOT NULL DEFAULT 'synced',
        fetched_at INTEGER NOT NULL,
        payload TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_leads_page ON leads (page)",
    "CREATE INDEX IF NOT EXISTS idx_leads_sync_status ON leads (sync_status)",
    "CREATE TABLE IF NOT EXISTS sync_meta (key TEXT PRIMARY KEY, value INTEGER NOT NULL)",
];

pub struct SqlPageStore {
    pool: SqlitePool,
    upsert_page_sql: String,
    upsert_one_sql: String,
    upsert_target: Duration,
}

fn backend_err(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn tx_err(e: sqlx::Error) -> StorageError {
    StorageError::Transaction(e.to_string())
}

/// Row prepared outside the transaction so serialization failures never
/// leave a half-open transaction behind.
struct PreparedRow<'a> {
    id: &'a str,
    updated_at: i64,
    sync_status: &'static str,
    payload: String,
}

impl SqlPageStore {
    /// Open a store from config, falling back to an in-memory database.
    pub async fn from_config(config: &LeadSyncConfig) -> Result<Self, StorageError> {
        let url = config.sql_url.as_deref().unwrap_or(IN_MEMORY_URL);
        Self::connect(url, config.sql_max_connections, config.reject_stale_updates, config.upsert_target()).await
    }

    /// Open with default settings.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        let config = LeadSyncConfig::default();
        Self::connect(connection_string, config.sql_max_connections, config.reject_stale_updates, config.upsert_target()).await
    }

    /// Fresh in-memory database.
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::new(IN_MEMORY_URL).await
    }

    /// Connect with startup-mode retry (fails fast if the path is wrong).
    pub async fn connect(
        connection_string: &str,
        max_connections: u32,
        reject_stale: bool,
        upsert_target: Duration,
    ) -> Result<Self, StorageError> {
        let in_memory = connection_string.contains(":memory:") || connection_string.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(connection_string)
            .map_err(backend_err)?
            .create_if_missing(true);
        if !in_memory {
            // WAL lets readers proceed while a page transaction commits
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        // Every in-memory connection is its own database, so pin exactly one
        // and never let the pool recycle it.
        let (max_connections, idle_timeout, max_lifetime) = if in_memory {
            (1, None, None)
        } else {
            (max_connections.max(1), Some(Duration::from_secs(300)), Some(Duration::from_secs(1800)))
        };

        let pool = retry("sql_connect", &RetryConfig::startup(), || {
            let options = options.clone();
            async move {
                SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .min_connections(if in_memory { 1 } else { 0 })
                    .acquire_timeout(Duration::from_secs(10))
                    .idle_timeout(idle_timeout)
                    .max_lifetime(max_lifetime)
                    .connect_with(options)
                    .await
                    .map_err(backend_err)
            }
        })
        .await?;

        let store = Self {
            pool,
            upsert_page_sql: Self::build_upsert_sql(reject_stale, true),
            upsert_one_sql: Self::build_upsert_sql(reject_stale, false),
            upsert_target,
        };
        store.init_schema().await?;

        info!(url = %connection_string, in_memory, reject_stale, "Durable page store ready");
        Ok(store)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        retry("sql_init_schema", &RetryConfig::startup(), || async {
            for statement in SCHEMA {
                sqlx::query(statement)
                    .execute(&self.pool)
                    .await
                    .map_err(backend_err)?;
            }
            Ok(())
        })
        .await
    }

    fn build_upsert_sql(reject_stale: bool, tag_page: bool) -> String {
        let fresh = if reject_stale { "excluded.updated_at >= leads.updated_at" } else { "1" };
        let page_columns = if tag_page {
            "page = excluded.page, position = excluded.position,"
        } else {
            ""
        };
        format!(
            "INSERT INTO leads (id, page, position, updated_at, sync_status, fetched_at, payload) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                {page_columns} \
                fetched_at = excluded.fetched_at, \
                payload = CASE WHEN {fresh} THEN excluded.payload ELSE leads.payload END, \
                sync_status = CASE WHEN {fresh} THEN excluded.sync_status ELSE leads.sync_status END, \
                updated_at = CASE WHEN {fresh} THEN excluded.updated_at ELSE leads.updated_at END"
        )
    }

    fn prepare(record: &LeadRecord) -> Result<PreparedRow<'_>, StorageError> {
        let payload = serde_json::to_string(record).map_err(|e| StorageError::Serialization {
            id: record.id.clone(),
            reason: e.to_string(),
        })?;
        Ok(PreparedRow {
            id: &record.id,
            updated_at: record.updated_at,
            sync_status: record.sync_status.as_str(),
            payload,
        })
    }

    fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<LeadRecord, StorageError> {
        let id: String = row.try_get("id").map_err(backend_err)?;
        let payload: String = row.try_get("payload").map_err(backend_err)?;
        serde_json::from_str(&payload).map_err(|e| StorageError::Serialization {
            id,
            reason: e.to_string(),
        })
    }

    async fn fetch_records(&self, sql: &str, bind: Option<i64>, limit: i64) -> Result<Vec<LeadRecord>, StorageError> {
        let mut query = sqlx::query(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        rows.iter().map(Self::decode).collect()
    }
}

#[async_trait]
impl PageStore for SqlPageStore {
    #[tracing::instrument(skip(self, records), fields(count = records.len()))]
    async fn upsert_many(&self, records: &[LeadRecord], page: u32) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        let prepared = records.iter().map(Self::prepare).collect::<Result<Vec<_>, _>>()?;
        let fetched_at = now_millis();

        // Dropping `tx` on any early return rolls the whole page back.
        let mut tx = self.pool.begin().await.map_err(tx_err)?;
        for (position, row) in prepared.iter().enumerate() {
            sqlx::query(&self.upsert_page_sql)
                .bind(row.id)
                .bind(i64::from(page))
                .bind(position as i64)
                .bind(row.updated_at)
                .bind(row.sync_status)
                .bind(fetched_at)
                .bind(&row.payload)
                .execute(&mut *tx)
                .await
                .map_err(tx_err)?;
        }
        tx.commit().await.map_err(tx_err)?;

        let elapsed = start.elapsed();
        crate::metrics::record_store_latency("upsert_many", elapsed);
        if elapsed > self.upsert_target {
            warn!(page, count = records.len(), elapsed_ms = elapsed.as_millis() as u64, "Page upsert exceeded latency target");
        } else {
            debug!(page, count = records.len(), elapsed_ms = elapsed.as_millis() as u64, "Page persisted");
        }

        Ok(records.len())
    }

    async fn upsert_one(&self, record: &LeadRecord) -> Result<(), StorageError> {
        let row = Self::prepare(record)?;
        sqlx::query(&self.upsert_one_sql)
            .bind(row.id)
            .bind(Option::<i64>::None)
            .bind(0i64)
            .bind(row.updated_at)
            .bind(row.sync_status)
            .bind(now_millis())
            .bind(&row.payload)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn get_page(&self, page: u32, limit: Option<usize>) -> Result<Vec<LeadRecord>, StorageError> {
        // LIMIT -1 means unbounded in SQLite
        let limit = limit.map_or(-1, |l| l as i64);
        self.fetch_records(
            "SELECT id, payload FROM leads WHERE page = ? ORDER BY position, id LIMIT ?",
            Some(i64::from(page)),
            limit,
        )
        .await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<LeadRecord>, StorageError> {
        let row = sqlx::query("SELECT id, payload FROM leads WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.as_ref().map(Self::decode).transpose()
    }

    async fn get_all_ids(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT id FROM leads ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get("id").map_err(backend_err)?);
        }
        Ok(ids)
    }

    async fn pending_changes(&self) -> Result<Vec<LeadRecord>, StorageError> {
        let rows = sqlx::query("SELECT id, payload FROM leads WHERE sync_status = ? ORDER BY updated_at, id")
            .bind(SyncStatus::Pending.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        rows.iter().map(Self::decode).collect()
    }

    async fn clear_page(&self, page: u32) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM leads WHERE page = ?")
            .bind(i64::from(page))
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        debug!(page, removed = result.rows_affected(), "Cleared page");
        Ok(result.rows_affected())
    }

    async fn clear_all(&self) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await.map_err(tx_err)?;
        let result = sqlx::query("DELETE FROM leads")
            .execute(&mut *tx)
            .await
            .map_err(tx_err)?;
        sqlx::query("DELETE FROM sync_meta")
            .execute(&mut *tx)
            .await
            .map_err(tx_err)?;
        tx.commit().await.map_err(tx_err)?;
        Ok(result.rows_affected())
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM leads")
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;
        let count: i64 = row.try_get("cnt").map_err(backend_err)?;
        Ok(count as u64)
    }

    async fn save_remote_totals(&self, totals: RemoteTotals) -> Result<(), StorageError> {
        let upsert = "INSERT INTO sync_meta (key, value) VALUES (?, ?) \
                      ON CONFLICT(key) DO UPDATE SET value = excluded.value";

        let mut tx = self.pool.begin().await.map_err(tx_err)?;
        sqlx::query(upsert)
            .bind("total_pages")
            .bind(i64::from(totals.total_pages))
            .execute(&mut *tx)
            .await
            .map_err(tx_err)?;
        match totals.total_count {
            Some(count) => {
                sqlx::query(upsert)
                    .bind("total_count")
                    .bind(count as i64)
                    .execute(&mut *tx)
                    .await
                    .map_err(tx_err)?;
            }
            None => {
                sqlx::query("DELETE FROM sync_meta WHERE key = 'total_count'")
                    .execute(&mut *tx)
                    .await
                    .map_err(tx_err)?;
            }
        }
        tx.commit().await.map_err(tx_err)
    }

    async fn remote_totals(&self) -> Result<Option<RemoteTotals>, StorageError> {
        let rows = sqlx::query("SELECT key, value FROM sync_meta WHERE key IN ('total_pages', 'total_count')")
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;

        let mut total_pages = None;
        let mut total_count = None;
        for row in rows {
            let key: String = row.try_get("key").map_err(backend_err)?;
            let value: i64 = row.try_get("value").map_err(backend_err)?;
            match key.as_str() {
                "total_pages" => total_pages = Some(value as u32),
                "total_count" => total_count = Some(value as u64),
                _ => {}
            }
        }

        Ok(total_pages.map(|total_pages| RemoteTotals { total_pages, total_count }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead::LeadStatus;

    fn lead(id: &str) -> LeadRecord {
        LeadRecord::new(id, format!("Lead {}", id))
    }

    #[tokio::test]
    async fn test_round_trip_preserves_fields() {
        let store = SqlPageStore::in_memory().await.unwrap();
        let mut record = lead("L1").with_status(LeadStatus::Proposal);
        record.email = Some("owner@example.test".into());
        record.phone = Some("+44 20 7946 0000".into());
        record.notes = Some("prefers mornings".into());

        store.upsert_many(std::slice::from_ref(&record), 1).await.unwrap();

        let page = store.get_page(1, None).await.unwrap();
        assert_eq!(page, vec![record.clone()]);
        assert_eq!(store.get_by_id("L1").await.unwrap(), Some(record));
        assert!(store.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = SqlPageStore::in_memory().await.unwrap();
        let records = vec![lead("L1"), lead("L2"), lead("L3")];

        store.upsert_many(&records, 1).await.unwrap();
        store.upsert_many(&records, 1).await.unwrap();

        assert_eq!(store.count_all().await.unwrap(), 3);
        assert_eq!(store.get_page(1, None).await.unwrap(), records);
    }

    #[tokio::test]
    async fn test_page_order_and_limit() {
        let store = SqlPageStore::in_memory().await.unwrap();
        let records = vec![lead("z"), lead("m"), lead("a")];
        store.upsert_many(&records, 4).await.unwrap();

        let ids: Vec<String> = store.get_page(4, Some(2)).await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["z", "m"]);
    }

    #[tokio::test]
    async fn test_single_record_per_id_across_pages() {
        let store = SqlPageStore::in_memory().await.unwrap();
        let first = lead("L1").with_status(LeadStatus::New).with_updated_at(100);
        let second = lead("L1").with_status(LeadStatus::Won).with_updated_at(200);

        store.upsert_many(&[first], 1).await.unwrap();
        store.upsert_many(&[second.clone()], 2).await.unwrap();

        assert_eq!(store.count_all().await.unwrap(), 1);
        assert!(store.get_page(1, None).await.unwrap().is_empty());
        assert_eq!(store.get_page(2, None).await.unwrap(), vec![second]);
    }

    #[tokio::test]
    async fn test_stale_page_does_not_overwrite_newer_record() {
        let store = SqlPageStore::in_memory().await.unwrap();
        let newer = lead("L1").with_status(LeadStatus::Won).with_updated_at(200);
        let stale = lead("L1").with_status(LeadStatus::New).with_updated_at(100);

        store.upsert_many(&[newer], 1).await.unwrap();
        store.upsert_many(&[stale], 2).await.unwrap();

        let stored = store.get_by_id("L1").await.unwrap().unwrap();
        assert_eq!(stored.status, LeadStatus::Won);
        // tag still follows the latest fetch
        assert_eq!(store.get_page(2, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_guard_disabled() {
        let store = SqlPageStore::connect(IN_MEMORY_URL, 1, false, Duration::from_millis(200)).await.unwrap();
        store.upsert_many(&[lead("L1").with_status(LeadStatus::Won).with_updated_at(200)], 1).await.unwrap();
        store.upsert_many(&[lead("L1").with_status(LeadStatus::New).with_updated_at(100)], 1).await.unwrap();

        assert_eq!(store.get_by_id("L1").await.unwrap().unwrap().status, LeadStatus::New);
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back_entirely() {
        let store = SqlPageStore::in_memory().await.unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_poison BEFORE INSERT ON leads WHEN NEW.id = 'poison' \
             BEGIN SELECT RAISE(ABORT, 'poisoned row'); END"
        )
            .execute(&store.pool())
            .await
            .unwrap();

        let result = store.upsert_many(&[lead("L1"), lead("poison"), lead("L3")], 1).await;

        assert!(matches!(result, Err(StorageError::Transaction(_))));
        assert_eq!(store.count_all().await.unwrap(), 0);
        assert!(store.get_page(1, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_one_keeps_page_tag() {
        let store = SqlPageStore::in_memory().await.unwrap();
        store.upsert_many(&[lead("L1").with_updated_at(100)], 3).await.unwrap();

        let updated = lead("L1").with_status(LeadStatus::Negotiation).with_updated_at(150);
        store.upsert_one(&updated).await.unwrap();
        store.upsert_one(&lead("L7")).await.unwrap();

        let page = store.get_page(3, None).await.unwrap();
        assert_eq!(page, vec![updated]);
        assert_eq!(store.count_all().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_clear_page_scenario() {
        let store = SqlPageStore::in_memory().await.unwrap();
        for page in 1..=3u32 {
            let records = vec![lead(&format!("p{}-a", page)), lead(&format!("p{}-b", page))];
            store.upsert_many(&records, page).await.unwrap();
        }

        assert_eq!(store.clear_page(2).await.unwrap(), 2);
        assert_eq!(store.get_page(1, None).await.unwrap().len(), 2);
        assert!(store.get_page(2, None).await.unwrap().is_empty());
        assert_eq!(store.get_page(3, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_page_with_meta() {
        let store = SqlPageStore::in_memory().await.unwrap();
        store.upsert_many(&[lead("L1"), lead("L2")], 1).await.unwrap();
        store.save_remote_totals(RemoteTotals { total_pages: 3, total_count: Some(60) }).await.unwrap();

        let meta = store.get_page_with_meta(1, 25).await.unwrap();
        assert_eq!(meta.items.len(), 2);
        assert_eq!(meta.current_page, 1);
        assert_eq!(meta.total_pages, 3);
        assert_eq!(meta.total_count, 60);
    }

    #[tokio::test]
    async fn test_remote_totals_round_trip_and_clear_all() {
        let store = SqlPageStore::in_memory().await.unwrap();
        assert!(store.remote_totals().await.unwrap().is_none());

        let totals = RemoteTotals { total_pages: 4, total_count: None };
        store.save_remote_totals(totals).await.unwrap();
        assert_eq!(store.remote_totals().await.unwrap(), Some(totals));

        store.upsert_many(&[lead("L1")], 1).await.unwrap();
        assert_eq!(store.clear_all().await.unwrap(), 1);
        assert!(store.remote_totals().await.unwrap().is_none());
        assert!(store.get_all_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_changes_and_ids() {
        let store = SqlPageStore::in_memory().await.unwrap();
        let mut pending = lead("b");
        pending.sync_status = SyncStatus::Pending;
        store.upsert_many(&[lead("c"), pending, lead("a")], 1).await.unwrap();

        assert_eq!(store.get_all_ids().await.unwrap(), vec!["a", "b", "c"]);
        let found = store.pending_changes().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "b");
    }

    #[tokio::test]
    async fn test_hundred_record_page_is_fast() {
        let store = SqlPageStore::in_memory().await.unwrap();
        let records: Vec<_> = (0..100).map(|i| lead(&format!("L{:03}", i))).collect();

        let start = Instant::now();
        store.upsert_many(&records, 1).await.unwrap();
        // 200ms on device; loose bound here so debug builds on busy CI pass
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(store.count_all().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("leads.db").display());

        {
            let store = SqlPageStore::new(&url).await.unwrap();
            store.upsert_many(&[lead("L1"), lead("L2")], 1).await.unwrap();
            store.pool().close().await;
        }

        let reopened = SqlPageStore::new(&url).await.unwrap();
        assert_eq!(reopened.count_all().await.unwrap(), 2);
        assert_eq!(reopened.get_page(1, None).await.unwrap().len(), 2);
    }
}
