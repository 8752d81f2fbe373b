// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync coordinator.
//!
//! The [`SyncCoordinator`] runs sync sessions: push pending local
//! mutations, pull every page the user has seen, reconcile ids, then
//! rehydrate page 1 from the durable store.
//!
//! # Gating
//!
//! ```text
//! trigger ─► offline? ─► SkippedOffline
//!              │
//!              ▼
//!          in flight? ─► SkippedInFlight
//!              │
//!              ▼
//!       inside guard? ─► Throttled { remaining_secs }
//!              │
//!              ▼
//!           Syncing ─► Idle | Error
//! ```
//!
//! Sessions are never cancelled mid-way; a failed one leaves the state at
//! `Error` and the next trigger simply tries again.

mod types;

pub use types::{SyncState, SyncTrigger, SyncOutcome, SyncReport, SyncSession, ManualSyncResult};

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::LeadCache;
use crate::config::LeadSyncConfig;
use crate::connectivity::{Connectivity, ConnectivitySubscription};
use crate::error::LeadSyncError;
use crate::lead::{accept_remote_batch, now_millis, LeadRecord, SyncStatus};
use crate::listeners::Subscription;
use crate::metrics;
use crate::pagination::PaginationController;
use crate::remote::RemoteLeadSource;
use crate::storage::traits::{total_pages, PageStore, RemoteTotals};

/// Serializes sync sessions and applies the guard interval.
pub struct SyncCoordinator {
    cache: Arc<LeadCache>,
    store: Arc<dyn PageStore>,
    remote: Arc<dyn RemoteLeadSource>,
    connectivity: Arc<dyn Connectivity>,
    pagination: Arc<PaginationController>,

    page_size: usize,
    guard: Duration,
    max_pages: u32,

    /// Single in-flight session, across all triggers
    in_flight: Mutex<()>,

    /// Monotonic time of the last successful session
    last_success: SyncMutex<Option<Instant>>,

    /// Coordinator state (broadcast to watchers)
    state: Arc<watch::Sender<SyncState>>,
}

impl SyncCoordinator {
    pub fn new(
        config: &LeadSyncConfig,
        cache: Arc<LeadCache>,
        store: Arc<dyn PageStore>,
        remote: Arc<dyn RemoteLeadSource>,
        connectivity: Arc<dyn Connectivity>,
        pagination: Arc<PaginationController>,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            cache,
            store,
            remote,
            connectivity,
            pagination,
            page_size: config.effective_page_size(),
            guard: config.sync_guard(),
            max_pages: config.sync_max_pages.max(1),
            in_flight: Mutex::new(()),
            last_success: SyncMutex::new(None),
            state: Arc::new(state),
        }
    }

    /// Current state. `Throttled` only lasts while the guard interval does.
    #[must_use]
    pub fn state(&self) -> SyncState {
        match *self.state.borrow() {
            SyncState::Throttled if self.guard_remaining().is_none() => SyncState::Idle,
            state => state,
        }
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Time left in the guard interval, if a session would be throttled now.
    #[must_use]
    pub fn guard_remaining(&self) -> Option<Duration> {
        let last = (*self.last_success.lock())?;
        let elapsed = last.elapsed();
        (elapsed < self.guard).then(|| self.guard - elapsed)
    }

    fn set_state(&self, state: SyncState) {
        self.state.send_replace(state);
        metrics::set_sync_state(state.as_gauge());
    }

    /// Publish `Throttled` and fall back to `Idle` when the guard expires,
    /// unless another session has moved the state on by then.
    fn set_throttled(&self, remaining: Duration) {
        self.set_state(SyncState::Throttled);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let state = Arc::downgrade(&self.state);
        handle.spawn(async move {
            tokio::time::sleep(remaining).await;
            let Some(state) = state.upgrade() else {
                return;
            };
            let reverted = state.send_if_modified(|current| {
                if *current == SyncState::Throttled {
                    *current = SyncState::Idle;
                    true
                } else {
                    false
                }
            });
            if reverted {
                metrics::set_sync_state(SyncState::Idle.as_gauge());
                debug!("Guard interval elapsed, sync state back to idle");
            }
        });
    }

    /// Run one sync session for `trigger`.
    #[tracing::instrument(skip(self), fields(trigger = %trigger, session))]
    pub async fn sync(&self, trigger: SyncTrigger) -> SyncSession {
        let id = Uuid::new_v4();
        tracing::Span::current().record("session", tracing::field::display(id));
        let started_at = now_millis();
        let start = Instant::now();

        let outcome = self.gate_and_run().await;

        let duration = start.elapsed();
        metrics::record_sync_session(trigger.as_str(), outcome.as_str());
        match &outcome {
            SyncOutcome::Success(report) => {
                metrics::record_sync_duration(duration);
                info!(
                    pages = report.pages_synced,
                    written = report.records_written,
                    pushed = report.pushed,
                    failed = report.failed,
                    local_only = report.local_only_ids.len(),
                    ?duration,
                    "Sync session complete"
                );
            }
            SyncOutcome::Error(error) => {
                metrics::record_sync_duration(duration);
                warn!(%error, ?duration, "Sync session failed");
            }
            SyncOutcome::Throttled { remaining_secs } => {
                debug!(remaining_secs, "Sync throttled");
            }
            SyncOutcome::SkippedOffline => debug!("Sync skipped, offline"),
            SyncOutcome::SkippedInFlight => debug!("Sync skipped, session in flight"),
        }

        SyncSession {
            id,
            trigger,
            started_at,
            finished_at: now_millis(),
            duration,
            outcome,
        }
    }

    /// UI entry point: run a session and flatten it to `{success, error}`.
    pub async fn manual_sync(&self, trigger: SyncTrigger) -> ManualSyncResult {
        ManualSyncResult::from(&self.sync(trigger).await)
    }

    async fn gate_and_run(&self) -> SyncOutcome {
        if !self.connectivity.is_online() {
            return SyncOutcome::SkippedOffline;
        }

        let Ok(_session) = self.in_flight.try_lock() else {
            return SyncOutcome::SkippedInFlight;
        };

        if let Some(remaining) = self.guard_remaining() {
            self.set_throttled(remaining);
            let remaining_secs = remaining.as_millis().div_ceil(1000) as u64;
            return SyncOutcome::Throttled { remaining_secs };
        }

        self.set_state(SyncState::Syncing);
        match self.run_session().await {
            Ok(report) => {
                *self.last_success.lock() = Some(Instant::now());
                self.cache.set_last_sync(now_millis());
                self.set_state(SyncState::Idle);

                if let Err(e) = self.pagination.rehydrate_first_page().await {
                    warn!(error = %e, "Failed to rehydrate first page after sync");
                }
                SyncOutcome::Success(report)
            }
            Err(e) => {
                let message = e.to_string();
                self.cache.set_error(Some(message.clone()));
                self.set_state(SyncState::Error);
                SyncOutcome::Error(message)
            }
        }
    }

    async fn run_session(&self) -> Result<SyncReport, LeadSyncError> {
        let mut report = SyncReport::default();
        self.push_pending(&mut report).await?;
        self.pull_pages(&mut report).await?;
        Ok(report)
    }

    /// Push local mutations queued while offline.
    async fn push_pending(&self, report: &mut SyncReport) -> Result<(), LeadSyncError> {
        let pending = self.store.pending_changes().await?;
        if pending.is_empty() {
            return Ok(());
        }
        debug!(count = pending.len(), "Pushing pending lead changes");

        for local in pending {
            let Some(patch) = local.local_changes.clone() else {
                continue;
            };

            match self.remote.update_lead(&local.id, &patch).await {
                Ok(payload) => {
                    let acknowledged = acknowledge(&local, &payload);
                    self.store.upsert_one(&acknowledged).await?;
                    self.cache.upsert_one(acknowledged);
                    report.pushed += 1;
                }
                Err(e) if e.is_transient() || e.is_cancelled() => return Err(e.into()),
                Err(e) => {
                    warn!(id = %local.id, error = %e, "Remote rejected pending change");
                    let mut failed = local;
                    failed.sync_status = SyncStatus::Failed;
                    self.store.upsert_one(&failed).await?;
                    self.cache.upsert_one(failed);
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Re-fetch pages `1..=max(pages_loaded)`, bounded by the remote total
    /// and `sync_max_pages`.
    async fn pull_pages(&self, report: &mut SyncReport) -> Result<(), LeadSyncError> {
        let loaded_max = self.cache.pagination().max_page_loaded().unwrap_or(1).max(1);
        let mut last_page = loaded_max.min(self.max_pages);
        let mut remote_ids: HashSet<String> = HashSet::new();
        let mut covered_all = false;

        let mut page = 1;
        while page <= last_page {
            let offset = (page - 1) as usize * self.page_size;
            let remote_page = self.remote.fetch(offset, self.page_size).await?;
            let records = accept_remote_batch(&remote_page.items);
            let pages = total_pages(remote_page.total, self.page_size);

            remote_ids.extend(records.iter().map(|r| r.id.clone()));
            report.records_written += self.store.upsert_many(&records, page).await?;
            self.store
                .save_remote_totals(RemoteTotals { total_pages: pages, total_count: Some(remote_page.total) })
                .await?;

            if self.cache.pagination().is_page_loaded(page) {
                self.cache.upsert(records, page, pages, Some(remote_page.total));
            }

            report.pages_synced += 1;
            if page >= pages {
                covered_all = true;
            }
            last_page = last_page.min(pages);
            page += 1;
        }

        if covered_all {
            let local_ids = self.store.get_all_ids().await?;
            report.local_only_ids = local_ids
                .into_iter()
                .filter(|id| !remote_ids.contains(id))
                .collect();
            if !report.local_only_ids.is_empty() {
                info!(count = report.local_only_ids.len(), "Local-only leads kept after full sweep");
            }
        }
        Ok(())
    }

    /// Issue a `Scheduled` sync every `interval` until `cancel` fires.
    pub fn spawn_scheduler(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Sync scheduler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        this.sync(SyncTrigger::Scheduled).await;
                    }
                }
            }
        })
    }

    /// Issue a `Resume` sync whenever connectivity returns. Must be called
    /// from within a tokio runtime.
    pub fn watch_connectivity(self: &Arc<Self>) -> ConnectivitySubscription {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, connectivity resume sync disabled");
            return Subscription::new(|| {});
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        self.connectivity.on_change(Box::new(move |online| {
            if !online {
                return;
            }
            if let Some(this) = weak.upgrade() {
                handle.spawn(async move {
                    this.sync(SyncTrigger::Resume).await;
                });
            }
        }))
    }
}

/// Merge the remote acknowledgement of a pushed change. The local
/// timestamp is kept as a floor so the stale-write guard accepts it.
fn acknowledge(local: &LeadRecord, payload: &serde_json::Value) -> LeadRecord {
    let mut acknowledged = match LeadRecord::from_remote(payload) {
        Ok(record) => record,
        Err(reason) => {
            warn!(id = %local.id, %reason, "Malformed acknowledgement, keeping local values");
            local.clone()
        }
    };
    acknowledged.updated_at = acknowledged.updated_at.max(local.updated_at);
    acknowledged.sync_status = SyncStatus::Synced;
    acknowledged.local_changes = None;
    acknowledged
}
