// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use serde_json::{json, Value};

use lead_sync::{
    LeadPatch, LeadRecord, PageStore, RemoteError, RemoteLeadSource, RemotePage, RemoteTotals,
    StorageError,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lead_sync=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn lead_json(id: &str, status: &str, updated_at: i64) -> Value {
    json!({
        "id": id,
        "name": format!("Lead {id}"),
        "company": "Acme Roofing",
        "status": status,
        "priority": "medium",
        "created_at": 1_000,
        "updated_at": updated_at,
    })
}

// =============================================================================
// Fake remote source - scripted responses and a call counter
// =============================================================================

#[derive(Default)]
pub struct FakeRemote {
    leads: Mutex<Vec<Value>>,
    failures: Mutex<VecDeque<RemoteError>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    pub updates: Mutex<Vec<(String, LeadPatch)>>,
}

impl FakeRemote {
    pub fn with_leads(count: usize) -> Arc<Self> {
        let remote = Self::default();
        *remote.leads.lock().unwrap() = (1..=count)
            .map(|i| lead_json(&format!("lead-{i:03}"), "new", 2_000))
            .collect();
        Arc::new(remote)
    }

    pub fn push_lead(&self, lead: Value) {
        self.leads.lock().unwrap().push(lead);
    }

    pub fn fail_next(&self, err: RemoteError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Every remote contact of any kind.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteLeadSource for FakeRemote {
    async fn fetch(&self, offset: usize, limit: usize) -> Result<RemotePage, RemoteError> {
        self.enter().await?;
        let leads = self.leads.lock().unwrap();
        Ok(RemotePage {
            items: leads.iter().skip(offset).take(limit).cloned().collect(),
            total: leads.len() as u64,
        })
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Value, RemoteError> {
        self.enter().await?;
        self.leads
            .lock()
            .unwrap()
            .iter()
            .find(|lead| lead["id"] == id)
            .cloned()
            .ok_or_else(|| RemoteError::from_status(404, "not found"))
    }

    async fn update_lead(&self, id: &str, patch: &LeadPatch) -> Result<Value, RemoteError> {
        self.enter().await?;
        self.updates.lock().unwrap().push((id.to_string(), patch.clone()));

        let mut leads = self.leads.lock().unwrap();
        let lead = leads
            .iter_mut()
            .find(|lead| lead["id"] == id)
            .ok_or_else(|| RemoteError::from_status(404, "not found"))?;
        if let Some(status) = patch.status {
            lead["status"] = json!(status.as_str());
        }
        if let Some(ref notes) = patch.notes {
            lead["notes"] = json!(notes);
        }
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        lead["updated_at"] = json!(now);
        Ok(lead.clone())
    }
}

// =============================================================================
// Failing store wrapper - precise error injection
// =============================================================================

/// Wraps a [`PageStore`] and fails selected operations on demand.
pub struct FailingPageStore<S: PageStore> {
    inner: S,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    /// Extra latency on `get_by_id`
    read_delay: Mutex<Option<Duration>>,
    pub write_calls: AtomicU64,
}

impl<S: PageStore> FailingPageStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            read_delay: Mutex::new(None),
            write_calls: AtomicU64::new(0),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock().unwrap() = delay;
    }

    fn check_write(&self) -> Result<(), StorageError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StorageError::Transaction("injected write failure".into()))
        } else {
            Ok(())
        }
    }

    fn check_read(&self) -> Result<(), StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(StorageError::Backend("injected read failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: PageStore> PageStore for FailingPageStore<S> {
    async fn upsert_many(&self, records: &[LeadRecord], page: u32) -> Result<usize, StorageError> {
        self.check_write()?;
        self.inner.upsert_many(records, page).await
    }

    async fn upsert_one(&self, record: &LeadRecord) -> Result<(), StorageError> {
        self.check_write()?;
        self.inner.upsert_one(record).await
    }

    async fn get_page(&self, page: u32, limit: Option<usize>) -> Result<Vec<LeadRecord>, StorageError> {
        self.check_read()?;
        self.inner.get_page(page, limit).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<LeadRecord>, StorageError> {
        self.check_read()?;
        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.get_by_id(id).await
    }

    async fn get_all_ids(&self) -> Result<Vec<String>, StorageError> {
        self.check_read()?;
        self.inner.get_all_ids().await
    }

    async fn pending_changes(&self) -> Result<Vec<LeadRecord>, StorageError> {
        self.check_read()?;
        self.inner.pending_changes().await
    }

    async fn clear_page(&self, page: u32) -> Result<u64, StorageError> {
        self.check_write()?;
        self.inner.clear_page(page).await
    }

    async fn clear_all(&self) -> Result<u64, StorageError> {
        self.check_write()?;
        self.inner.clear_all().await
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        self.check_read()?;
        self.inner.count_all().await
    }

    async fn save_remote_totals(&self, totals: RemoteTotals) -> Result<(), StorageError> {
        self.check_write()?;
        self.inner.save_remote_totals(totals).await
    }

    async fn remote_totals(&self) -> Result<Option<RemoteTotals>, StorageError> {
        self.check_read()?;
        self.inner.remote_totals().await
    }
}
