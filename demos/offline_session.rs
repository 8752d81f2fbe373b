// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline field session walkthrough.
//!
//! Demonstrates:
//! 1. Scrolling the lead list page by page
//! 2. Dropping offline and editing a lead locally
//! 3. Looking up a lead while offline (served from the store)
//! 4. Reconnecting and syncing the pending edit
//! 5. Displaying metrics
//!
//! # Run
//!
//! ```bash
//! cargo run --example offline_session
//! ```

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use parking_lot::Mutex;
use serde_json::{json, Value};

use lead_sync::{
    LeadPatch, LeadStatus, LeadSyncConfig, LeadSyncEngine, LoadOutcome, RemoteError,
    RemoteLeadSource, RemotePage, SyncTrigger, WatchConnectivity,
};

/// A tiny in-process CRM standing in for the real backend.
struct DemoCrm {
    leads: Mutex<Vec<Value>>,
}

impl DemoCrm {
    fn new(count: usize) -> Self {
        let leads = (1..=count)
            .map(|i| {
                json!({
                    "id": format!("lead-{i:03}"),
                    "name": format!("Homeowner {i}"),
                    "company": "Acme Roofing",
                    "status": "new",
                    "created_at": 1_700_000_000_000i64,
                })
            })
            .collect();
        Self { leads: Mutex::new(leads) }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[async_trait]
impl RemoteLeadSource for DemoCrm {
    async fn fetch(&self, offset: usize, limit: usize) -> Result<RemotePage, RemoteError> {
        let leads = self.leads.lock();
        Ok(RemotePage {
            items: leads.iter().skip(offset).take(limit).cloned().collect(),
            total: leads.len() as u64,
        })
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Value, RemoteError> {
        self.leads
            .lock()
            .iter()
            .find(|lead| lead["id"] == id)
            .cloned()
            .ok_or_else(|| RemoteError::from_status(404, "no such lead"))
    }

    async fn update_lead(&self, id: &str, patch: &LeadPatch) -> Result<Value, RemoteError> {
        let mut leads = self.leads.lock();
        let lead = leads
            .iter_mut()
            .find(|lead| lead["id"] == id)
            .ok_or_else(|| RemoteError::from_status(404, "no such lead"))?;
        if let Some(status) = patch.status {
            lead["status"] = json!(status.as_str());
        }
        lead["updated_at"] = json!(now_millis());
        Ok(lead.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Open the engine and scroll
    // ─────────────────────────────────────────────────────────────────────────
    let network = Arc::new(WatchConnectivity::new(true));
    let config = LeadSyncConfig {
        page_size: 5,
        scheduled_sync_secs: 0,
        ..Default::default()
    };
    let engine = LeadSyncEngine::open(config, Arc::new(DemoCrm::new(12)), network.clone()).await?;
    engine.start().await?;

    let _sub = engine.subscribe(|snap| {
        println!("   ↻ {} leads on screen", snap.items().len());
    });

    println!("\n📜 Scrolling...");
    loop {
        match engine.load_next().await? {
            LoadOutcome::Loaded { page, count } => println!("   └─ page {page}: {count} leads"),
            other => {
                println!("   └─ stopped: {}", other.as_str());
                break;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Go offline and close a deal
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📴 Going offline");
    network.set_online(false);

    let won = engine.update_lead("lead-003", LeadPatch::status(LeadStatus::Won)).await?;
    println!("   └─ {} is {:?} ({:?})", won.id, won.status, won.sync_status);

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Offline lookup
    // ─────────────────────────────────────────────────────────────────────────
    let handle = engine.lookup_by_id("lead-007").await;
    let state = handle.state();
    println!(
        "   └─ lookup lead-007: found={} source={:?} cache_miss={}",
        state.record.is_some(),
        state.source,
        state.cache_miss
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Reconnect and sync
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📶 Back online");
    network.set_online(true);
    let result = engine.manual_sync(SyncTrigger::PullToRefresh).await;
    println!("   └─ sync success={} error={:?}", result.success, result.error);

    if let Some(lead) = engine.snapshot().get("lead-003") {
        println!("   └─ lead-003 is {:?} ({:?})", lead.status, lead.sync_status);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Metrics:");
    for (key, _, _, value) in snapshotter.snapshot().into_vec() {
        let value = match value {
            DebugValue::Counter(v) => v.to_string(),
            DebugValue::Gauge(v) => format!("{:.0}", v.into_inner()),
            DebugValue::Histogram(v) => format!("{} samples", v.len()),
        };
        println!("   └─ {} = {}", key.key().name(), value);
    }

    engine.shutdown().await;
    println!("\n👋 Done");
    Ok(())
}
