// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-id lookup: network first, durable store on transient failure.
//!
//! | Remote result              | Outcome                          |
//! |----------------------------|----------------------------------|
//! | success                    | `Found { source: Network }`      |
//! | network / timeout / 5xx    | store hit → `Found { Cache }`    |
//! |                            | store miss → `Miss(CacheMiss)`   |
//! | 4xx / malformed            | `Err(Validation)`                |
//!
//! Offline (or `skip_remote`) goes straight to the store.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::LeadSyncConfig;
use crate::connectivity::Connectivity;
use crate::error::LeadSyncError;
use crate::lead::LeadRecord;
use crate::metrics::{self, LatencyTimer};
use crate::remote::RemoteLeadSource;
use crate::storage::traits::PageStore;

/// Where a resolved record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Network,
    Cache,
}

/// Neither the remote nor the durable store could supply the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheMiss;

impl std::fmt::Display for CacheMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no cached copy available")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found { record: LeadRecord, source: Source },
    Miss(CacheMiss),
}

impl LookupOutcome {
    #[must_use]
    pub fn record(&self) -> Option<&LeadRecord> {
        match self {
            Self::Found { record, .. } => Some(record),
            Self::Miss(_) => None,
        }
    }

    #[must_use]
    pub fn source(&self) -> Option<Source> {
        match self {
            Self::Found { source, .. } => Some(*source),
            Self::Miss(_) => None,
        }
    }
}

/// A retry for the same id arrived inside the debounce window.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("retry too soon, wait {remaining:?}")]
pub struct RetryRejected {
    pub remaining: Duration,
}

pub struct DataResolver {
    store: Arc<dyn PageStore>,
    remote: Arc<dyn RemoteLeadSource>,
    connectivity: Arc<dyn Connectivity>,
    lookup_target: Duration,
    retry_debounce: Duration,
    /// Monotonic time of the last attempt per id
    last_attempt: DashMap<String, Instant>,
}

impl DataResolver {
    pub fn new(
        config: &LeadSyncConfig,
        store: Arc<dyn PageStore>,
        remote: Arc<dyn RemoteLeadSource>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            store,
            remote,
            connectivity,
            lookup_target: config.cache_lookup_target(),
            retry_debounce: config.lookup_retry_debounce(),
            last_attempt: DashMap::new(),
        }
    }

    /// Resolve `id` once.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, id: &str, skip_remote: bool) -> Result<LookupOutcome, LeadSyncError> {
        if !skip_remote && self.connectivity.is_online() {
            match self.remote.fetch_by_id(id).await {
                Ok(payload) => {
                    let record = LeadRecord::from_remote(&payload).map_err(|reason| {
                        metrics::record_rejected_record(&reason);
                        metrics::record_lookup("error");
                        LeadSyncError::Validation(format!("lead {}: {}", id, reason))
                    })?;

                    if let Err(e) = self.store.upsert_one(&record).await {
                        warn!(id, error = %e, "Failed to store fetched lead");
                        metrics::record_store_error("upsert_one");
                    }
                    metrics::record_lookup("network");
                    return Ok(LookupOutcome::Found { record, source: Source::Network });
                }
                Err(e) if e.is_transient() => {
                    debug!(id, error = %e, "Remote lookup failed, falling back to store");
                }
                Err(e) => {
                    metrics::record_lookup("error");
                    return Err(e.into());
                }
            }
        }

        self.resolve_from_store(id).await
    }

    /// Durable-store half of [`resolve`](Self::resolve).
    pub async fn resolve_from_store(&self, id: &str) -> Result<LookupOutcome, LeadSyncError> {
        let timer = LatencyTimer::new("get_by_id");
        let found = self.store.get_by_id(id).await;
        let elapsed = timer.elapsed();
        if elapsed > self.lookup_target {
            warn!(id, ?elapsed, target = ?self.lookup_target, "Cache lookup exceeded soft target");
        }

        match found {
            Ok(Some(record)) => {
                metrics::record_lookup("cache");
                Ok(LookupOutcome::Found { record, source: Source::Cache })
            }
            Ok(None) => {
                metrics::record_lookup("miss");
                Ok(LookupOutcome::Miss(CacheMiss))
            }
            Err(e) => {
                metrics::record_store_error("get_by_id");
                metrics::record_lookup("error");
                Err(e.into())
            }
        }
    }

    /// Claim an attempt slot for `id`, rejecting it inside the debounce window.
    fn claim_attempt(&self, id: &str) -> Result<(), RetryRejected> {
        let now = Instant::now();
        match self.last_attempt.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                let elapsed = now.duration_since(*entry.get());
                if elapsed < self.retry_debounce {
                    return Err(RetryRejected { remaining: self.retry_debounce - elapsed });
                }
                entry.insert(now);
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
            }
        }
        Ok(())
    }

    /// Resolve `id` and return an observable handle for it.
    pub async fn lookup_by_id(self: &Arc<Self>, id: impl Into<String>) -> LookupHandle {
        let id = id.into();
        // Expired entries debounce nothing
        self.last_attempt.retain(|_, at| at.elapsed() < self.retry_debounce);
        self.last_attempt.insert(id.clone(), Instant::now());

        let (state, _) = watch::channel(LookupState::default());
        let handle = LookupHandle {
            id,
            resolver: Arc::clone(self),
            state,
        };
        handle.run().await;
        handle
    }
}

/// Observable state of one by-id lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupState {
    pub record: Option<LeadRecord>,
    pub loading: bool,
    pub error: Option<String>,
    pub source: Option<Source>,
    pub cache_miss: bool,
}

/// Handle for a by-id lookup. Its state can be polled with
/// [`state`](Self::state) or watched with [`changes`](Self::changes).
pub struct LookupHandle {
    id: String,
    resolver: Arc<DataResolver>,
    state: watch::Sender<LookupState>,
}

impl LookupHandle {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> LookupState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn changes(&self) -> watch::Receiver<LookupState> {
        self.state.subscribe()
    }

    /// Resolve again. Rejected when the last attempt for this id (from any
    /// handle) was less than the debounce interval ago.
    pub async fn retry(&self) -> Result<LookupState, RetryRejected> {
        self.resolver.claim_attempt(&self.id).inspect_err(|rejected| {
            debug!(id = %self.id, remaining = ?rejected.remaining, "Lookup retry debounced");
        })?;
        self.run().await;
        Ok(self.state())
    }

    async fn run(&self) {
        self.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });

        let outcome = self.resolver.resolve(&self.id, false).await;

        self.state.send_modify(|state| {
            state.loading = false;
            match outcome {
                Ok(LookupOutcome::Found { record, source }) => {
                    state.record = Some(record);
                    state.source = Some(source);
                    state.cache_miss = false;
                }
                Ok(LookupOutcome::Miss(_)) => {
                    state.record = None;
                    state.source = None;
                    state.cache_miss = true;
                }
                Err(e) => {
                    state.error = Some(e.to_string());
                }
            }
        });
    }
}
