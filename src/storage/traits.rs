// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use crate::lead::LeadRecord;
use thiserror::Error;

/// Durable store failures. All of them are retryable I/O conditions; a
/// failed transaction has already been rolled back when this is returned.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Transaction rolled back: {0}")]
    Transaction(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Failed to (de)serialize record '{id}': {reason}")]
    Serialization {
        id: String,
        reason: String,
    },
}

/// A page read back from the store together with its pagination metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PageWithMeta {
    pub items: Vec<LeadRecord>,
    pub current_page: u32,
    /// `ceil(total_count / limit)`
    pub total_pages: u32,
    pub total_count: u64,
}

/// Totals last reported by the remote source, kept so a cold start while
/// offline still knows how many pages exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteTotals {
    pub total_pages: u32,
    pub total_count: Option<u64>,
}

#[must_use]
pub fn total_pages(total_count: u64, limit: usize) -> u32 {
    if limit == 0 {
        return 0;
    }
    total_count.div_ceil(limit as u64) as u32
}

/// Transactional local persistence of page-tagged lead records.
///
/// Each record keeps a single page tag: re-fetching it into another page
/// moves the tag, so evicting a page never touches rows fetched later.
#[async_trait]
pub trait PageStore: Send + Sync {
    /// Write a page in one transaction. Either every record lands with the
    /// `page` tag or none does.
    async fn upsert_many(&self, records: &[LeadRecord], page: u32) -> Result<usize, StorageError>;

    /// Write a single record, keeping its current page tag if it has one.
    async fn upsert_one(&self, record: &LeadRecord) -> Result<(), StorageError>;

    async fn get_page(&self, page: u32, limit: Option<usize>) -> Result<Vec<LeadRecord>, StorageError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<LeadRecord>, StorageError>;

    /// All record ids, for reconciliation sweeps.
    async fn get_all_ids(&self) -> Result<Vec<String>, StorageError>;

    /// Records holding an unpushed local change.
    async fn pending_changes(&self) -> Result<Vec<LeadRecord>, StorageError>;

    /// Delete only the rows tagged with `page`, returning how many went.
    async fn clear_page(&self, page: u32) -> Result<u64, StorageError>;

    /// Drop everything (logout).
    async fn clear_all(&self) -> Result<u64, StorageError>;

    async fn count_all(&self) -> Result<u64, StorageError>;

    async fn save_remote_totals(&self, totals: RemoteTotals) -> Result<(), StorageError>;

    async fn remote_totals(&self) -> Result<Option<RemoteTotals>, StorageError>;

    /// Read a page plus metadata. Totals come from the larger of the local
    /// row count and the last remote report.
    async fn get_page_with_meta(&self, page: u32, limit: usize) -> Result<PageWithMeta, StorageError> {
        let items = self.get_page(page, Some(limit)).await?;
        let local_count = self.count_all().await?;
        let remote = self.remote_totals().await?.unwrap_or_default();

        let total_count = remote.total_count.map_or(local_count, |c| c.max(local_count));
        Ok(PageWithMeta {
            items,
            current_page: page,
            total_pages: total_pages(total_count, limit).max(remote.total_pages),
            total_count,
        })
    }
}
