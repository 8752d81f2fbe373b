// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the lead sync engine.
//!
//! # Example
//!
//! ```
//! use lead_sync::LeadSyncConfig;
//!
//! // Minimal config (uses defaults, in-memory SQLite)
//! let config = LeadSyncConfig::default();
//! assert_eq!(config.page_size, 25);
//! assert_eq!(config.sync_guard_secs, 30);
//!
//! // On-device file store with a tighter guard
//! let config = LeadSyncConfig {
//!     sql_url: Some("sqlite://leads.db".into()),
//!     sync_guard_secs: 10,
//!     ..Default::default()
//! };
//! assert_eq!(config.page_size, 25);
//! ```

use std::time::Duration;
use serde::Deserialize;

/// Configuration for the lead sync engine.
///
/// All fields have sensible defaults. On a device you should at least set
/// `sql_url` to a file path so data survives restarts.
#[derive(Debug, Clone, Deserialize)]
pub struct LeadSyncConfig {
    /// SQLite connection string (e.g., "sqlite://leads.db"). `None` keeps
    /// the store in memory.
    #[serde(default)]
    pub sql_url: Option<String>,

    /// Pool size for the SQLite store (forced to 1 for in-memory databases)
    #[serde(default = "default_sql_max_connections")]
    pub sql_max_connections: u32,

    /// Records per remote page (default: 25)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Minimum seconds between two sync sessions (default: 30)
    #[serde(default = "default_sync_guard_secs")]
    pub sync_guard_secs: u64,

    /// Upper bound on pages pulled by one sync session
    #[serde(default = "default_sync_max_pages")]
    pub sync_max_pages: u32,

    /// Background sync interval in seconds (0 = disabled)
    #[serde(default = "default_scheduled_sync_secs")]
    pub scheduled_sync_secs: u64,

    /// Minimum interval between two lookup retries for the same id
    #[serde(default = "default_lookup_retry_debounce_ms")]
    pub lookup_retry_debounce_ms: u64,

    /// Soft latency target for durable lookups (logged when breached)
    #[serde(default = "default_cache_lookup_target_ms")]
    pub cache_lookup_target_ms: u64,

    /// Soft latency target for a page upsert (logged when breached)
    #[serde(default = "default_upsert_target_ms")]
    pub upsert_target_ms: u64,

    /// Refuse to overwrite a record with one carrying an older `updated_at`
    #[serde(default = "default_reject_stale_updates")]
    pub reject_stale_updates: bool,
}

fn default_sql_max_connections() -> u32 { 4 }
fn default_page_size() -> usize { 25 }
fn default_sync_guard_secs() -> u64 { 30 }
fn default_sync_max_pages() -> u32 { 20 }
fn default_scheduled_sync_secs() -> u64 { 300 } // 5 minutes
fn default_lookup_retry_debounce_ms() -> u64 { 2_000 }
fn default_cache_lookup_target_ms() -> u64 { 800 }
fn default_upsert_target_ms() -> u64 { 200 }
fn default_reject_stale_updates() -> bool { true }

impl Default for LeadSyncConfig {
    fn default() -> Self {
        Self {
            sql_url: None,
            sql_max_connections: default_sql_max_connections(),
            page_size: default_page_size(),
            sync_guard_secs: default_sync_guard_secs(),
            sync_max_pages: default_sync_max_pages(),
            scheduled_sync_secs: default_scheduled_sync_secs(),
            lookup_retry_debounce_ms: default_lookup_retry_debounce_ms(),
            cache_lookup_target_ms: default_cache_lookup_target_ms(),
            upsert_target_ms: default_upsert_target_ms(),
            reject_stale_updates: default_reject_stale_updates(),
        }
    }
}

impl LeadSyncConfig {
    #[must_use]
    pub fn sync_guard(&self) -> Duration {
        Duration::from_secs(self.sync_guard_secs)
    }

    #[must_use]
    pub fn lookup_retry_debounce(&self) -> Duration {
        Duration::from_millis(self.lookup_retry_debounce_ms)
    }

    #[must_use]
    pub fn cache_lookup_target(&self) -> Duration {
        Duration::from_millis(self.cache_lookup_target_ms)
    }

    #[must_use]
    pub fn upsert_target(&self) -> Duration {
        Duration::from_millis(self.upsert_target_ms)
    }

    /// Scheduled sync interval, `None` when disabled.
    #[must_use]
    pub fn scheduled_sync(&self) -> Option<Duration> {
        (self.scheduled_sync_secs > 0).then(|| Duration::from_secs(self.scheduled_sync_secs))
    }

    /// Page size, never zero.
    #[must_use]
    pub fn effective_page_size(&self) -> usize {
        self.page_size.max(1)
    }
}
