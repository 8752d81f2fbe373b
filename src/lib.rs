// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Lead Sync Engine
//!
//! Offline-first synchronization and paginated caching for a field sales
//! lead client running on flaky mobile connectivity.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     LeadSyncEngine (facade)                 │
//! │  • items() / load_next() / reload() / lookup_by_id()        │
//! │  • manual_sync() / update_lead() / subscribe()              │
//! └─────────────────────────────────────────────────────────────┘
//!          │                     │                      │
//!          ▼                     ▼                      ▼
//! ┌──────────────────┐ ┌───────────────────┐ ┌──────────────────┐
//! │ SyncCoordinator  │ │PaginationController│ │  DataResolver    │
//! │ • guard interval │ │ • offset paging    │ │ • network first  │
//! │ • in-flight mutex│ │ • cancellation     │ │ • cache fallback │
//! └──────────────────┘ └───────────────────┘ └──────────────────┘
//!          │    writes           │ writes               │ reads
//!          ▼                     ▼                      ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          LeadCache: normalized id → record read model       │
//! │  • copy-on-write snapshots, subscribe/unsubscribe           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        PageStore: durable, page-tagged SQLite rows          │
//! │  • one transaction per page upsert                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lead_sync::{LeadSyncEngine, LeadSyncConfig, SyncTrigger, WatchConnectivity};
//! # use lead_sync::remote::RemoteLeadSource;
//! # async fn example(remote: Arc<dyn RemoteLeadSource>) {
//! let connectivity = Arc::new(WatchConnectivity::new(true));
//! let engine = LeadSyncEngine::open(LeadSyncConfig::default(), remote, connectivity)
//!     .await
//!     .expect("open store");
//!
//! engine.load_next().await.expect("first page");
//! for lead in engine.items() {
//!     println!("{} {:?}", lead.id, lead.status);
//! }
//!
//! let result = engine.manual_sync(SyncTrigger::PullToRefresh).await;
//! assert!(result.success || result.error.is_some());
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`storage`]: Durable page store (SQLite, in-memory)
//! - [`cache`]: Normalized memory cache, the read model for consumers
//! - [`coordinator`]: Sync sessions, guard interval, in-flight mutex
//! - [`pagination`]: Load-next / reload with cancellation
//! - [`resolver`]: Per-id lookup with network/cache fallback
//! - [`connectivity`]: Online/offline signal
//! - [`remote`]: Remote lead source contract

pub mod config;
pub mod error;
pub mod lead;
pub mod storage;
pub mod cache;
pub mod connectivity;
pub mod remote;
pub mod pagination;
pub mod coordinator;
pub mod resolver;
pub mod engine;
pub mod resilience;
pub mod metrics;
mod listeners;
#[cfg(test)]
mod test_support;

pub use config::LeadSyncConfig;
pub use error::LeadSyncError;
pub use lead::{LeadRecord, LeadPatch, LeadStatus, LeadPriority, SyncStatus, RecordRejection};
pub use storage::traits::{PageStore, PageWithMeta, RemoteTotals, StorageError};
pub use storage::sql::SqlPageStore;
pub use storage::memory::InMemoryPageStore;
pub use cache::{LeadCache, CacheSnapshot, PaginationMeta, Subscription};
pub use connectivity::{Connectivity, ConnectivitySubscription, WatchConnectivity};
pub use remote::{RemoteLeadSource, RemotePage, RemoteError};
pub use pagination::{PaginationController, LoadOutcome};
pub use coordinator::{SyncCoordinator, SyncState, SyncTrigger, SyncOutcome, SyncSession, SyncReport, ManualSyncResult};
pub use resolver::{DataResolver, LookupHandle, LookupOutcome, LookupState, Source, CacheMiss, RetryRejected};
pub use engine::LeadSyncEngine;
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
