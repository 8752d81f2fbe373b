// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Scripted remote source shared by unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::lead::LeadPatch;
use crate::remote::{RemoteError, RemoteLeadSource, RemotePage};

pub(crate) fn lead_json(id: &str, updated_at: i64) -> Value {
    json!({
        "id": id,
        "name": format!("Lead {id}"),
        "status": "new",
        "created_at": 1_000,
        "updated_at": updated_at,
    })
}

#[derive(Default)]
pub(crate) struct ScriptedRemote {
    leads: Mutex<Vec<Value>>,
    failures: Mutex<VecDeque<RemoteError>>,
    delay: Mutex<Option<Duration>>,
    pub fetch_calls: AtomicUsize,
    pub by_id_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub offsets: Mutex<Vec<usize>>,
}

impl ScriptedRemote {
    /// `count` leads with ids `lead-001`, `lead-002`, ...
    pub(crate) fn with_leads(count: usize) -> Self {
        let remote = Self::default();
        *remote.leads.lock() = (1..=count).map(|i| lead_json(&format!("lead-{i:03}"), 2_000)).collect();
        remote
    }

    pub(crate) fn set_leads(&self, leads: Vec<Value>) {
        *self.leads.lock() = leads;
    }

    /// The next call of any kind fails with `err`.
    pub(crate) fn fail_next(&self, err: RemoteError) {
        self.failures.lock().push_back(err);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub(crate) fn calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
            + self.by_id_calls.load(Ordering::SeqCst)
            + self.update_calls.load(Ordering::SeqCst)
    }

    async fn before_call(&self) -> Result<(), RemoteError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteLeadSource for ScriptedRemote {
    async fn fetch(&self, offset: usize, limit: usize) -> Result<RemotePage, RemoteError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.offsets.lock().push(offset);
        self.before_call().await?;

        let leads = self.leads.lock();
        let items = leads.iter().skip(offset).take(limit).cloned().collect();
        Ok(RemotePage { items, total: leads.len() as u64 })
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Value, RemoteError> {
        self.by_id_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;

        self.leads
            .lock()
            .iter()
            .find(|lead| lead["id"] == id)
            .cloned()
            .ok_or_else(|| RemoteError::from_status(404, format!("lead {id} not found")))
    }

    async fn update_lead(&self, id: &str, patch: &LeadPatch) -> Result<Value, RemoteError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;

        let mut leads = self.leads.lock();
        let lead = leads
            .iter_mut()
            .find(|lead| lead["id"] == id)
            .ok_or_else(|| RemoteError::from_status(404, format!("lead {id} not found")))?;

        let changes = serde_json::to_value(patch).map_err(|e| RemoteError::Malformed(e.to_string()))?;
        if let (Some(target), Some(changes)) = (lead.as_object_mut(), changes.as_object()) {
            for (field, value) in changes {
                target.insert(field.clone(), value.clone());
            }
            let bumped = target.get("updated_at").and_then(Value::as_i64).unwrap_or(0) + 1_000;
            target.insert("updated_at".into(), json!(crate::lead::now_millis().max(bumped)));
        }
        Ok(lead.clone())
    }
}
