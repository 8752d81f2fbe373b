// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process [`PageStore`], used by tests and by hosts that do not need
//! persistence across restarts.

use std::collections::HashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use crate::lead::{LeadRecord, SyncStatus};
use super::traits::{PageStore, RemoteTotals, StorageError};

#[derive(Debug, Clone)]
struct StoredRow {
    record: LeadRecord,
    page: Option<u32>,
    /// Position within its page
    position: usize,
}

#[derive(Default)]
struct Tables {
    rows: HashMap<String, StoredRow>,
    totals: Option<RemoteTotals>,
}

pub struct InMemoryPageStore {
    tables: Mutex<Tables>,
    reject_stale: bool,
}

impl InMemoryPageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_stale_guard(true)
    }

    /// `reject_stale = false` gives plain last-applied-wins replacement.
    #[must_use]
    pub fn with_stale_guard(reject_stale: bool) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            reject_stale,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.lock().rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.lock().rows.is_empty()
    }

    /// Page tag of a record, if it has one.
    #[must_use]
    pub fn page_of(&self, id: &str) -> Option<u32> {
        self.tables.lock().rows.get(id).and_then(|row| row.page)
    }

    fn merge_record(&self, existing: Option<&StoredRow>, incoming: &LeadRecord) -> LeadRecord {
        match existing {
            Some(row) if self.reject_stale && !incoming.supersedes(&row.record) => row.record.clone(),
            _ => incoming.clone(),
        }
    }
}

impl Default for InMemoryPageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageStore for InMemoryPageStore {
    async fn upsert_many(&self, records: &[LeadRecord], page: u32) -> Result<usize, StorageError> {
        let mut tables = self.tables.lock();

        // Build the page off to the side, then apply it in one step.
        let mut staged: Vec<(String, StoredRow)> = Vec::with_capacity(records.len());
        for (position, incoming) in records.iter().enumerate() {
            let record = self.merge_record(tables.rows.get(&incoming.id), incoming);
            staged.push((incoming.id.clone(), StoredRow { record, page: Some(page), position }));
        }
        for (id, row) in staged {
            tables.rows.insert(id, row);
        }

        Ok(records.len())
    }

    async fn upsert_one(&self, record: &LeadRecord) -> Result<(), StorageError> {
        let mut tables = self.tables.lock();
        let existing = tables.rows.get(&record.id);
        let merged = self.merge_record(existing, record);
        let (page, position) = existing.map_or((None, usize::MAX), |row| (row.page, row.position));

        tables.rows.insert(record.id.clone(), StoredRow {
            record: merged,
            page,
            position,
        });
        Ok(())
    }

    async fn get_page(&self, page: u32, limit: Option<usize>) -> Result<Vec<LeadRecord>, StorageError> {
        let tables = self.tables.lock();
        let mut rows: Vec<&StoredRow> = tables.rows.values()
            .filter(|row| row.page == Some(page))
            .collect();
        rows.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.record.id.cmp(&b.record.id)));

        Ok(rows.into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|row| row.record.clone())
            .collect())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<LeadRecord>, StorageError> {
        Ok(self.tables.lock().rows.get(id).map(|row| row.record.clone()))
    }

    async fn get_all_ids(&self) -> Result<Vec<String>, StorageError> {
        let mut ids: Vec<String> = self.tables.lock().rows.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn pending_changes(&self) -> Result<Vec<LeadRecord>, StorageError> {
        let mut pending: Vec<LeadRecord> = self.tables.lock().rows.values()
            .filter(|row| row.record.sync_status == SyncStatus::Pending)
            .map(|row| row.record.clone())
            .collect();
        pending.sort_by_key(|r| r.updated_at);
        Ok(pending)
    }

    async fn clear_page(&self, page: u32) -> Result<u64, StorageError> {
        let mut tables = self.tables.lock();
        let before = tables.rows.len();
        tables.rows.retain(|_, row| row.page != Some(page));
        Ok((before - tables.rows.len()) as u64)
    }

    async fn clear_all(&self) -> Result<u64, StorageError> {
        let mut tables = self.tables.lock();
        let removed = tables.rows.len() as u64;
        tables.rows.clear();
        tables.totals = None;
        Ok(removed)
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        Ok(self.tables.lock().rows.len() as u64)
    }

    async fn save_remote_totals(&self, totals: RemoteTotals) -> Result<(), StorageError> {
        self.tables.lock().totals = Some(totals);
        Ok(())
    }

    async fn remote_totals(&self) -> Result<Option<RemoteTotals>, StorageError> {
        Ok(self.tables.lock().totals)
    }
}
