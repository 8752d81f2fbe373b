// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine facade handed to the UI layer.
//!
//! [`LeadSyncEngine`] owns the cache, the durable store and the three
//! policies (sync, pagination, lookup) and wires them to the same
//! `Arc`s. Nothing here is global: two engines over two stores are fully
//! independent.
//!
//! # Lifecycle
//!
//! ```text
//! open/new ─► start() ─► ... ─► shutdown()
//!              │                   │
//!              ├ rehydrate page 1  ├ cancel in-flight page fetches
//!              ├ scheduler task    └ stop scheduler + resume listener
//!              └ resume listener
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheSnapshot, LeadCache, PaginationMeta};
use crate::config::LeadSyncConfig;
use crate::connectivity::{Connectivity, ConnectivitySubscription};
use crate::coordinator::{ManualSyncResult, SyncCoordinator, SyncSession, SyncState, SyncTrigger};
use crate::error::LeadSyncError;
use crate::lead::{now_millis, LeadPatch, LeadRecord, SyncStatus};
use crate::listeners::Subscription;
use crate::pagination::{LoadOutcome, PaginationController};
use crate::remote::RemoteLeadSource;
use crate::resolver::{DataResolver, LookupHandle, LookupOutcome};
use crate::storage::sql::SqlPageStore;
use crate::storage::traits::{PageStore, PageWithMeta};

#[derive(Default)]
struct Background {
    started: bool,
    scheduler: Option<JoinHandle<()>>,
    resume: Option<ConnectivitySubscription>,
}

pub struct LeadSyncEngine {
    config: LeadSyncConfig,
    cache: Arc<LeadCache>,
    store: Arc<dyn PageStore>,
    remote: Arc<dyn RemoteLeadSource>,
    connectivity: Arc<dyn Connectivity>,
    pagination: Arc<PaginationController>,
    coordinator: Arc<SyncCoordinator>,
    resolver: Arc<DataResolver>,
    shutdown: CancellationToken,
    background: Mutex<Background>,
}

impl LeadSyncEngine {
    /// Open the SQLite store named by `config.sql_url` (in-memory when
    /// unset) and build an engine over it.
    pub async fn open(
        config: LeadSyncConfig,
        remote: Arc<dyn RemoteLeadSource>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Self, LeadSyncError> {
        let store = SqlPageStore::from_config(&config).await?;
        Ok(Self::new(config, Arc::new(store), remote, connectivity))
    }

    pub fn new(
        config: LeadSyncConfig,
        store: Arc<dyn PageStore>,
        remote: Arc<dyn RemoteLeadSource>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let cache = Arc::new(LeadCache::with_stale_guard(config.reject_stale_updates));

        let pagination = Arc::new(PaginationController::with_cancel_token(
            Arc::clone(&cache),
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::clone(&connectivity),
            config.effective_page_size(),
            shutdown.child_token(),
        ));
        let coordinator = Arc::new(SyncCoordinator::new(
            &config,
            Arc::clone(&cache),
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::clone(&connectivity),
            Arc::clone(&pagination),
        ));
        let resolver = Arc::new(DataResolver::new(
            &config,
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::clone(&connectivity),
        ));

        Self {
            config,
            cache,
            store,
            remote,
            connectivity,
            pagination,
            coordinator,
            resolver,
            shutdown,
            background: Mutex::new(Background::default()),
        }
    }

    /// Show cached data immediately, then start the scheduled sync task
    /// and the resume-on-reconnect listener. Calling it twice is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), LeadSyncError> {
        if self.background.lock().started {
            return Ok(());
        }

        if self.cache.pagination().pages_loaded.is_empty() {
            let restored = self.pagination.rehydrate_first_page().await?;
            debug!(restored, "Cold start from durable store");
        }

        let mut background = self.background.lock();
        if background.started {
            return Ok(());
        }
        background.started = true;
        if let Some(interval) = self.config.scheduled_sync() {
            background.scheduler = Some(self.coordinator.spawn_scheduler(interval, self.shutdown.child_token()));
        }
        background.resume = Some(self.coordinator.watch_connectivity());

        info!(
            page_size = self.config.effective_page_size(),
            scheduled_sync = ?self.config.scheduled_sync(),
            online = self.connectivity.is_online(),
            "Lead sync engine started"
        );
        Ok(())
    }

    /// Cancel in-flight page fetches and stop background work. Sync
    /// sessions already running finish on their own.
    pub async fn shutdown(&self) {
        info!("Shutting down lead sync engine");
        self.shutdown.cancel();

        let scheduler = {
            let mut background = self.background.lock();
            background.resume = None;
            background.scheduler.take()
        };
        if let Some(handle) = scheduler {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sync scheduler ended abnormally");
            }
        }
    }

    // ========== Read model ==========

    /// Records on loaded pages, in page order.
    #[must_use]
    pub fn items(&self) -> Vec<LeadRecord> {
        self.cache.items()
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.cache.snapshot()
    }

    #[must_use]
    pub fn pagination(&self) -> PaginationMeta {
        self.cache.pagination()
    }

    #[must_use]
    pub fn refreshing(&self) -> bool {
        self.cache.pagination().refreshing
    }

    /// Last pagination or sync error, cleared by the next success.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.cache.pagination().last_error
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<CacheSnapshot>) + Send + Sync + 'static,
    {
        self.cache.subscribe(listener)
    }

    /// Read a stored page with totals, without touching the network.
    pub async fn page_with_meta(&self, page: u32) -> Result<PageWithMeta, LeadSyncError> {
        Ok(self.store.get_page_with_meta(page, self.config.effective_page_size()).await?)
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<LeadCache> {
        &self.cache
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    // ========== Pagination ==========

    pub async fn load_next(&self) -> Result<LoadOutcome, LeadSyncError> {
        self.pagination.load_next().await
    }

    pub async fn reload(&self) -> Result<LoadOutcome, LeadSyncError> {
        self.pagination.reload().await
    }

    // ========== Lookup ==========

    pub async fn lookup_by_id(&self, id: impl Into<String>) -> LookupHandle {
        self.resolver.lookup_by_id(id).await
    }

    pub async fn resolve(&self, id: &str) -> Result<LookupOutcome, LeadSyncError> {
        self.resolver.resolve(id, false).await
    }

    // ========== Sync ==========

    pub async fn manual_sync(&self, trigger: SyncTrigger) -> ManualSyncResult {
        self.coordinator.manual_sync(trigger).await
    }

    pub async fn sync(&self, trigger: SyncTrigger) -> SyncSession {
        self.coordinator.sync(trigger).await
    }

    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        self.coordinator.state()
    }

    #[must_use]
    pub fn sync_state_receiver(&self) -> watch::Receiver<SyncState> {
        self.coordinator.state_receiver()
    }

    // ========== Mutations ==========

    /// Change a lead. Online, the remote applies it first and a
    /// `StatusUpdate` sync follows in the background. Offline (or on a
    /// transient failure) the patch is applied locally and queued as
    /// pending for the next sync. Queued changes stay ahead of new ones:
    /// a lead that already has a pending patch is always updated locally.
    #[tracing::instrument(skip(self, patch))]
    pub async fn update_lead(&self, id: &str, patch: LeadPatch) -> Result<LeadRecord, LeadSyncError> {
        if patch.is_empty() {
            return Err(LeadSyncError::Validation(format!("empty patch for lead {}", id)));
        }

        let current = match self.cache.get(id) {
            Some(record) => Some(record),
            None => self.store.get_by_id(id).await?,
        };
        let has_queued = current.as_ref().is_some_and(|r| r.sync_status == SyncStatus::Pending);

        if self.connectivity.is_online() && !has_queued {
            match self.remote.update_lead(id, &patch).await {
                Ok(payload) => {
                    let mut record = LeadRecord::from_remote(&payload)
                        .map_err(|reason| LeadSyncError::Validation(format!("lead {}: {}", id, reason)))?;
                    if let Some(ref current) = current {
                        record.updated_at = record.updated_at.max(current.updated_at);
                    }

                    self.store.upsert_one(&record).await?;
                    self.cache.upsert_one(record.clone());
                    info!(id, status = %record.status, "Lead updated remotely");

                    let coordinator = Arc::clone(&self.coordinator);
                    tokio::spawn(async move {
                        coordinator.sync(SyncTrigger::StatusUpdate).await;
                    });
                    return Ok(record);
                }
                Err(e) if e.is_transient() => {
                    debug!(id, error = %e, "Remote update failed, queueing locally");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut record = current.ok_or_else(|| LeadSyncError::Validation(format!("unknown lead {}", id)))?;
        patch.apply_to(&mut record);
        record.local_changes = Some(match record.local_changes.take() {
            Some(queued) => queued.merge(patch),
            None => patch,
        });
        record.sync_status = SyncStatus::Pending;
        record.updated_at = now_millis().max(record.updated_at + 1);

        self.store.upsert_one(&record).await?;
        self.cache.upsert_one(record.clone());
        info!(id, status = %record.status, "Lead update queued for sync");
        Ok(record)
    }

    /// Drop every cached and stored lead.
    pub async fn logout(&self) -> Result<(), LeadSyncError> {
        let removed = self.store.clear_all().await?;
        self.cache.clear();
        info!(removed, "Local lead data cleared");
        Ok(())
    }
}

impl Drop for LeadSyncEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
