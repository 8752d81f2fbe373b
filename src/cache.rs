// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Normalized in-memory read model.
//!
//! One entity per id plus per-page list positions and pagination state.
//! Every mutation is prepared on a private copy and published as a single
//! `Arc` swap, so a reader holding a [`CacheSnapshot`] never sees a
//! half-applied page. Writers are serialized by a mutex; readers never
//! block on it.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::lead::LeadRecord;
use crate::listeners::ListenerSet;
use crate::metrics;

pub use crate::listeners::Subscription;

/// Pagination bookkeeping as seen by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationMeta {
    /// Sorted and deduplicated regardless of arrival order
    pub pages_loaded: BTreeSet<u32>,
    pub total_pages: u32,
    pub total_count: Option<u64>,
    /// Derived: `max(pages_loaded) < total_pages`, true while nothing is loaded
    pub has_more: bool,
    pub loading_next: bool,
    pub refreshing: bool,
    /// Epoch millis of the last successful sync session
    pub last_sync: Option<i64>,
    pub last_error: Option<String>,
}

impl Default for PaginationMeta {
    fn default() -> Self {
        Self {
            pages_loaded: BTreeSet::new(),
            total_pages: 0,
            total_count: None,
            has_more: true,
            loading_next: false,
            refreshing: false,
            last_sync: None,
            last_error: None,
        }
    }
}

impl PaginationMeta {
    #[must_use]
    pub fn is_page_loaded(&self, page: u32) -> bool {
        self.pages_loaded.contains(&page)
    }

    #[must_use]
    pub fn max_page_loaded(&self) -> Option<u32> {
        self.pages_loaded.last().copied()
    }

    /// Page `load_next` would fetch.
    #[must_use]
    pub fn next_page(&self) -> u32 {
        self.max_page_loaded().map_or(1, |p| p + 1)
    }

    fn derive_has_more(&mut self) {
        self.has_more = match self.max_page_loaded() {
            None => true,
            Some(max) => max < self.total_pages,
        };
    }
}

/// Immutable view of the cache at one instant.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    entities: HashMap<String, LeadRecord>,
    /// page -> ids in list order
    positions: BTreeMap<u32, Vec<String>>,
    /// id -> page it is listed on
    page_of: HashMap<String, u32>,
    pagination: PaginationMeta,
}

impl CacheSnapshot {
    /// Records on loaded pages, in page order then list order.
    #[must_use]
    pub fn items(&self) -> Vec<LeadRecord> {
        self.positions
            .iter()
            .filter(|(page, _)| self.pagination.is_page_loaded(**page))
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| self.entities.get(id).cloned())
            .collect()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&LeadRecord> {
        self.entities.get(id)
    }

    #[must_use]
    pub fn pagination(&self) -> &PaginationMeta {
        &self.pagination
    }

    #[must_use]
    pub fn page_ids(&self, page: u32) -> Option<&[String]> {
        self.positions.get(&page).map(Vec::as_slice)
    }

    /// Number of entities, including ones not listed on a loaded page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn merge_entity(&mut self, record: LeadRecord, reject_stale: bool) -> bool {
        match self.entities.get(&record.id) {
            Some(existing) if reject_stale && !record.supersedes(existing) => {
                debug!(id = %record.id, "Cache kept newer entity");
                false
            }
            _ => {
                self.entities.insert(record.id.clone(), record);
                true
            }
        }
    }

    fn unlist(&mut self, id: &str) {
        if let Some(prev) = self.page_of.remove(id) {
            if let Some(ids) = self.positions.get_mut(&prev) {
                ids.retain(|other| other != id);
            }
        }
    }
}

/// Shared normalized cache. Cheap to clone behind an `Arc`.
pub struct LeadCache {
    state: RwLock<Arc<CacheSnapshot>>,
    writer: Mutex<()>,
    listeners: Arc<ListenerSet<Arc<CacheSnapshot>>>,
    reject_stale: bool,
}

impl Default for LeadCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LeadCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_stale_guard(true)
    }

    /// With `reject_stale`, an entity is only replaced by a record whose
    /// `updated_at` is not older than the cached one.
    #[must_use]
    pub fn with_stale_guard(reject_stale: bool) -> Self {
        Self {
            state: RwLock::new(Arc::new(CacheSnapshot::default())),
            writer: Mutex::new(()),
            listeners: ListenerSet::new(),
            reject_stale,
        }
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut CacheSnapshot) -> R) -> R {
        let (result, published) = {
            let _writer = self.writer.lock();
            let mut next = CacheSnapshot::clone(&self.state.read());
            let result = f(&mut next);
            next.pagination.derive_has_more();

            let published = Arc::new(next);
            *self.state.write() = Arc::clone(&published);
            (result, published)
        };

        metrics::set_cache_stats(published.len(), published.pagination.pages_loaded.len());
        self.listeners.notify(&published);
        result
    }

    /// Merge a fetched page by id and mark `page` loaded. Returns how many
    /// entities were written.
    pub fn upsert(
        &self,
        batch: Vec<LeadRecord>,
        page: u32,
        total_pages: u32,
        total_count: Option<u64>,
    ) -> usize {
        let reject_stale = self.reject_stale;
        self.mutate(|snap| {
            let mut listed = Vec::with_capacity(batch.len());
            let mut written = 0;

            for record in batch {
                if record.id.is_empty() {
                    warn!(page, "Skipping cached item without id");
                    continue;
                }
                let id = record.id.clone();
                if snap.merge_entity(record, reject_stale) {
                    written += 1;
                }
                if snap.page_of.get(&id) != Some(&page) {
                    snap.unlist(&id);
                }
                if !listed.contains(&id) {
                    listed.push(id);
                }
            }

            // The page's list is exactly what was just fetched
            if let Some(old) = snap.positions.remove(&page) {
                for id in old {
                    if !listed.contains(&id) {
                        snap.page_of.remove(&id);
                    }
                }
            }
            for id in &listed {
                snap.page_of.insert(id.clone(), page);
            }
            snap.positions.insert(page, listed);

            snap.pagination.pages_loaded.insert(page);
            snap.pagination.total_pages = total_pages;
            if total_count.is_some() {
                snap.pagination.total_count = total_count;
            }
            snap.pagination.last_error = None;
            written
        })
    }

    /// Single-item mutation. The record keeps its list position.
    pub fn upsert_one(&self, record: LeadRecord) -> bool {
        if record.id.is_empty() {
            warn!("Skipping cached item without id");
            return false;
        }
        let reject_stale = self.reject_stale;
        self.mutate(|snap| snap.merge_entity(record, reject_stale))
    }

    /// Reset to empty.
    pub fn clear(&self) {
        self.mutate(|snap| *snap = CacheSnapshot::default());
    }

    /// Reset pagination bookkeeping and list positions, keeping entities
    /// so by-id reads still hit while a reload is in flight.
    pub fn clear_pages(&self) {
        self.mutate(|snap| {
            snap.positions.clear();
            snap.page_of.clear();
            snap.pagination.pages_loaded.clear();
            snap.pagination.total_pages = 0;
            snap.pagination.total_count = None;
        });
    }

    /// Claim the single load slot. Returns false if a load is already running.
    pub fn begin_loading(&self) -> bool {
        self.mutate(|snap| {
            if snap.pagination.loading_next {
                false
            } else {
                snap.pagination.loading_next = true;
                true
            }
        })
    }

    pub fn finish_loading(&self, error: Option<String>) {
        self.mutate(|snap| {
            snap.pagination.loading_next = false;
            if error.is_some() {
                snap.pagination.last_error = error;
            }
        });
    }

    pub fn set_refreshing(&self, refreshing: bool) {
        self.mutate(|snap| snap.pagination.refreshing = refreshing);
    }

    pub fn set_last_sync(&self, epoch_millis: i64) {
        self.mutate(|snap| {
            snap.pagination.last_sync = Some(epoch_millis);
            snap.pagination.last_error = None;
        });
    }

    pub fn set_error(&self, error: Option<String>) {
        self.mutate(|snap| snap.pagination.last_error = error);
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        Arc::clone(&self.state.read())
    }

    #[must_use]
    pub fn items(&self) -> Vec<LeadRecord> {
        self.snapshot().items()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<LeadRecord> {
        self.snapshot().get(id).cloned()
    }

    #[must_use]
    pub fn pagination(&self) -> PaginationMeta {
        self.snapshot().pagination.clone()
    }

    /// Call `listener` with the new snapshot after every committed mutation.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<CacheSnapshot>) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead::LeadStatus;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn lead(id: &str, updated_at: i64) -> LeadRecord {
        LeadRecord::new(id, format!("Lead {id}")).with_updated_at(updated_at)
    }

    fn page_of(ids: &[&str]) -> Vec<LeadRecord> {
        ids.iter().map(|id| lead(id, 1)).collect()
    }

    fn ids(items: &[LeadRecord]) -> Vec<&str> {
        items.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_empty_cache_has_more() {
        let cache = LeadCache::new();
        let meta = cache.pagination();
        assert!(meta.has_more);
        assert!(meta.pages_loaded.is_empty());
        assert_eq!(meta.next_page(), 1);
        assert!(cache.items().is_empty());
    }

    #[test]
    fn test_upsert_derives_has_more() {
        let cache = LeadCache::new();
        cache.upsert(page_of(&["a", "b"]), 1, 2, Some(4));
        assert!(cache.pagination().has_more);

        cache.upsert(page_of(&["c", "d"]), 2, 2, Some(4));
        let meta = cache.pagination();
        assert!(!meta.has_more);
        assert_eq!(meta.total_count, Some(4));
        assert_eq!(ids(&cache.items()), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_out_of_order_pages_sorted() {
        let cache = LeadCache::new();
        cache.upsert(page_of(&["e", "f"]), 3, 3, None);
        cache.upsert(page_of(&["a", "b"]), 1, 3, None);
        cache.upsert(page_of(&["a", "b"]), 1, 3, None);
        cache.upsert(page_of(&["c", "d"]), 2, 3, None);

        let meta = cache.pagination();
        assert_eq!(meta.pages_loaded.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(meta.is_page_loaded(2));
        assert!(!meta.is_page_loaded(4));
        assert_eq!(ids(&cache.items()), vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn test_record_moving_pages_listed_once() {
        let cache = LeadCache::new();
        cache.upsert(page_of(&["a", "b"]), 1, 2, None);
        // "b" shifted onto page 2 remotely
        cache.upsert(page_of(&["b", "c"]), 2, 2, None);

        assert_eq!(ids(&cache.items()), vec!["a", "b", "c"]);
        assert_eq!(cache.snapshot().len(), 3);
        assert_eq!(cache.snapshot().page_ids(1), Some(&["a".to_string()][..]));
    }

    #[test]
    fn test_empty_id_skipped() {
        let cache = LeadCache::new();
        let mut bad = lead("x", 1);
        bad.id.clear();
        let written = cache.upsert(vec![bad, lead("ok", 1)], 1, 1, None);
        assert_eq!(written, 1);
        assert_eq!(ids(&cache.items()), vec!["ok"]);
        assert!(!cache.upsert_one(LeadRecord::new("", "nameless")));
    }

    #[test]
    fn test_stale_guard() {
        let cache = LeadCache::new();
        cache.upsert(vec![lead("a", 200).with_status(LeadStatus::Won)], 1, 1, None);
        cache.upsert(vec![lead("a", 100)], 1, 1, None);
        assert_eq!(cache.get("a").unwrap().status, LeadStatus::Won);

        let lenient = LeadCache::with_stale_guard(false);
        lenient.upsert(vec![lead("a", 200).with_status(LeadStatus::Won)], 1, 1, None);
        lenient.upsert(vec![lead("a", 100)], 1, 1, None);
        assert_eq!(lenient.get("a").unwrap().status, LeadStatus::New);
    }

    #[test]
    fn test_upsert_one_keeps_position() {
        let cache = LeadCache::new();
        cache.upsert(page_of(&["a", "b", "c"]), 1, 1, None);
        cache.upsert_one(lead("b", 5).with_status(LeadStatus::Contacted));

        let items = cache.items();
        assert_eq!(ids(&items), vec!["a", "b", "c"]);
        assert_eq!(items[1].status, LeadStatus::Contacted);
    }

    #[test]
    fn test_clear_pages_keeps_entities() {
        let cache = LeadCache::new();
        cache.upsert(page_of(&["a", "b"]), 1, 3, Some(6));
        cache.clear_pages();

        let meta = cache.pagination();
        assert!(meta.pages_loaded.is_empty());
        assert!(meta.has_more);
        assert_eq!(meta.total_count, None);
        assert!(cache.items().is_empty());
        assert!(cache.get("a").is_some());

        cache.clear();
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_loading_slot() {
        let cache = LeadCache::new();
        assert!(cache.begin_loading());
        assert!(!cache.begin_loading());
        cache.finish_loading(Some("boom".into()));

        let meta = cache.pagination();
        assert!(!meta.loading_next);
        assert_eq!(meta.last_error.as_deref(), Some("boom"));

        assert!(cache.begin_loading());
        cache.upsert(page_of(&["a"]), 1, 1, None);
        cache.finish_loading(None);
        assert_eq!(cache.pagination().last_error, None);
    }

    #[test]
    fn test_last_sync_and_refreshing() {
        let cache = LeadCache::new();
        cache.set_error(Some("offline".into()));
        cache.set_refreshing(true);
        assert!(cache.pagination().refreshing);

        cache.set_last_sync(1_700_000_000_000);
        let meta = cache.pagination();
        assert_eq!(meta.last_sync, Some(1_700_000_000_000));
        assert_eq!(meta.last_error, None);
    }

    #[test]
    fn test_snapshot_is_stable_across_writes() {
        let cache = LeadCache::new();
        cache.upsert(page_of(&["a"]), 1, 2, None);
        let before = cache.snapshot();

        cache.upsert(page_of(&["b"]), 2, 2, None);
        assert_eq!(before.items().len(), 1);
        assert_eq!(cache.items().len(), 2);
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let cache = LeadCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen_items = Arc::new(AtomicUsize::new(0));

        let (c, s) = (calls.clone(), seen_items.clone());
        let sub = cache.subscribe(move |snap| {
            c.fetch_add(1, Ordering::SeqCst);
            s.store(snap.items().len(), Ordering::SeqCst);
        });

        cache.upsert(page_of(&["a", "b"]), 1, 1, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen_items.load(Ordering::SeqCst), 2);

        sub.unsubscribe();
        cache.clear();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_read_cache() {
        let cache = Arc::new(LeadCache::new());
        let inner = Arc::clone(&cache);
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();

        let _sub = cache.subscribe(move |_| {
            s.store(inner.items().len(), Ordering::SeqCst);
        });
        cache.upsert(page_of(&["a"]), 1, 1, None);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn prop_pages_loaded_sorted_and_deduplicated(pages in proptest::collection::vec(1u32..20, 1..40)) {
            let cache = LeadCache::new();
            for page in &pages {
                let id = format!("p{page}");
                cache.upsert(vec![lead(&id, 1)], *page, 20, None);
            }

            let meta = cache.pagination();
            let loaded: Vec<u32> = meta.pages_loaded.iter().copied().collect();
            let mut expected = pages.clone();
            expected.sort_unstable();
            expected.dedup();
            prop_assert_eq!(&loaded, &expected);

            let max = *expected.last().unwrap();
            prop_assert_eq!(meta.has_more, max < 20);

            let order: Vec<String> = cache.items().into_iter().map(|r| r.id).collect();
            let expected_order: Vec<String> = expected.iter().map(|p| format!("p{p}")).collect();
            prop_assert_eq!(order, expected_order);
        }
    }
}
