// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offset pagination against the remote source.
//!
//! The controller fetches the page after the highest one loaded, validates
//! it, and writes it to the durable store and then the cache. Offline,
//! redundant and exhausted loads resolve immediately as a [`LoadOutcome`]
//! without touching the network.
//!
//! One load runs at a time. A scroll load holds the load gate for its whole
//! duration; `reload` cancels whatever holds it, waits for the gate, and
//! only then resets the page bookkeeping and fetches page 1.

use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::LeadCache;
use crate::connectivity::Connectivity;
use crate::error::LeadSyncError;
use crate::lead::accept_remote_batch;
use crate::metrics;
use crate::remote::{RemoteError, RemoteLeadSource};
use crate::storage::traits::{total_pages, PageStore, RemoteTotals};

/// What a `load_next` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Page fetched and written; `count` records passed validation
    Loaded { page: u32, count: usize },
    Offline,
    AlreadyLoading,
    NoMore,
    /// Torn down while the fetch was in flight; nothing was written
    Cancelled,
}

impl LoadOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loaded { .. } => "loaded",
            Self::Offline => "offline",
            Self::AlreadyLoading => "already_loading",
            Self::NoMore => "no_more",
            Self::Cancelled => "cancelled",
        }
    }
}

pub struct PaginationController {
    cache: Arc<LeadCache>,
    store: Arc<dyn PageStore>,
    remote: Arc<dyn RemoteLeadSource>,
    connectivity: Arc<dyn Connectivity>,
    page_size: usize,
    /// Teardown token; every load token is a child of it
    cancel: CancellationToken,
    /// Token for the load currently allowed to run, replaced by `reload`
    load_cancel: Mutex<CancellationToken>,
    gate: AsyncMutex<()>,
}

impl PaginationController {
    pub fn new(
        cache: Arc<LeadCache>,
        store: Arc<dyn PageStore>,
        remote: Arc<dyn RemoteLeadSource>,
        connectivity: Arc<dyn Connectivity>,
        page_size: usize,
    ) -> Self {
        Self::with_cancel_token(cache, store, remote, connectivity, page_size, CancellationToken::new())
    }

    /// Bind in-flight fetches to `cancel` (usually a child of the engine's
    /// shutdown token).
    pub fn with_cancel_token(
        cache: Arc<LeadCache>,
        store: Arc<dyn PageStore>,
        remote: Arc<dyn RemoteLeadSource>,
        connectivity: Arc<dyn Connectivity>,
        page_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cache,
            store,
            remote,
            connectivity,
            page_size: page_size.max(1),
            load_cancel: Mutex::new(cancel.child_token()),
            cancel,
            gate: AsyncMutex::new(()),
        }
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fetch the next page.
    #[tracing::instrument(skip(self), fields(page))]
    pub async fn load_next(&self) -> Result<LoadOutcome, LeadSyncError> {
        let result = self.load_next_inner().await;
        record_outcome(&result);
        result
    }

    async fn load_next_inner(&self) -> Result<LoadOutcome, LeadSyncError> {
        if !self.connectivity.is_online() {
            debug!("Offline, skipping page load");
            return Ok(LoadOutcome::Offline);
        }
        let Ok(_gate) = self.gate.try_lock() else {
            return Ok(LoadOutcome::AlreadyLoading);
        };
        self.load_gated().await
    }

    /// Body of a load. Callers hold `gate`.
    async fn load_gated(&self) -> Result<LoadOutcome, LeadSyncError> {
        if self.cancel.is_cancelled() {
            return Ok(LoadOutcome::Cancelled);
        }

        let meta = self.cache.pagination();
        if meta.loading_next {
            return Ok(LoadOutcome::AlreadyLoading);
        }
        if !meta.has_more {
            return Ok(LoadOutcome::NoMore);
        }
        if !self.cache.begin_loading() {
            return Ok(LoadOutcome::AlreadyLoading);
        }

        // Re-read under the claim; a concurrent load may have just landed
        let meta = self.cache.pagination();
        if !meta.has_more {
            self.cache.finish_loading(None);
            return Ok(LoadOutcome::NoMore);
        }
        let page = meta.next_page();
        let offset = meta.max_page_loaded().unwrap_or(0) as usize * self.page_size;
        tracing::Span::current().record("page", page);

        let token = self.load_cancel.lock().clone();
        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => Err(RemoteError::Cancelled),
            result = self.remote.fetch(offset, self.page_size) => result,
        };

        let remote_page = match fetched {
            Ok(remote_page) if !token.is_cancelled() => remote_page,
            Ok(_) => {
                self.cache.finish_loading(None);
                return Ok(LoadOutcome::Cancelled);
            }
            Err(e) if e.is_cancelled() => {
                debug!(page, "Page load cancelled");
                self.cache.finish_loading(None);
                return Ok(LoadOutcome::Cancelled);
            }
            Err(e) => {
                let err = LeadSyncError::from(e);
                warn!(page, offset, error = %err, "Page load failed");
                self.cache.finish_loading(Some(err.to_string()));
                return Err(err);
            }
        };

        let records = accept_remote_batch(&remote_page.items);
        let count = records.len();
        let pages = total_pages(remote_page.total, self.page_size);

        // Durable first: a failed transaction leaves the cache untouched too
        if let Err(e) = self.store.upsert_many(&records, page).await {
            warn!(page, error = %e, "Failed to persist page");
            metrics::record_store_error("upsert_many");
            self.cache.finish_loading(Some(e.to_string()));
            return Err(e.into());
        }

        let totals = RemoteTotals { total_pages: pages, total_count: Some(remote_page.total) };
        if let Err(e) = self.store.save_remote_totals(totals).await {
            warn!(error = %e, "Failed to persist remote totals");
        }

        self.cache.upsert(records, page, pages, Some(remote_page.total));
        self.cache.finish_loading(None);
        info!(page, count, total_pages = pages, "Page loaded");
        Ok(LoadOutcome::Loaded { page, count })
    }

    /// Reset pagination and load page 1 again. A scroll load still in
    /// flight is cancelled and drained first. While offline the first page
    /// is rebuilt from the durable store instead.
    #[tracing::instrument(skip(self))]
    pub async fn reload(&self) -> Result<LoadOutcome, LeadSyncError> {
        self.cache.set_refreshing(true);

        self.load_cancel.lock().cancel();
        let _gate = self.gate.lock().await;
        *self.load_cancel.lock() = self.cancel.child_token();
        self.cache.clear_pages();

        let result = if self.connectivity.is_online() {
            let result = self.load_gated().await;
            record_outcome(&result);
            result
        } else {
            debug!("Offline, rebuilding first page from store");
            self.rehydrate_first_page().await.map(|_| LoadOutcome::Offline)
        };

        self.cache.set_refreshing(false);
        result
    }

    /// Rebuild page 1 in the cache from the durable store. Returns how
    /// many records were restored; an empty store leaves the cache alone.
    pub async fn rehydrate_first_page(&self) -> Result<usize, LeadSyncError> {
        let page = self.store.get_page_with_meta(1, self.page_size).await?;
        if page.items.is_empty() {
            return Ok(0);
        }

        let count = page.items.len();
        self.cache.upsert(page.items, 1, page.total_pages, Some(page.total_count));
        debug!(count, total_pages = page.total_pages, "Rehydrated first page from store");
        Ok(count)
    }

    /// Cancel in-flight fetches. Later loads resolve as `Cancelled`.
    pub fn teardown(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Pagination torn down");
            self.cancel.cancel();
        }
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn record_outcome(result: &Result<LoadOutcome, LeadSyncError>) {
    match result {
        Ok(outcome) => metrics::record_page_load(outcome.as_str()),
        Err(_) => metrics::record_page_load("error"),
    }
}

impl Drop for PaginationController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
