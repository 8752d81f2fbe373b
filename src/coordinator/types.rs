// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync coordinator.

use std::time::Duration;
use uuid::Uuid;

/// Coordinator state.
///
/// Use [`super::SyncCoordinator::state()`] to check the current state or
/// [`super::SyncCoordinator::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    /// A session is pushing and pulling
    Syncing,
    /// The last request arrived inside the guard interval
    Throttled,
    /// The last session failed; the next trigger retries
    Error,
}

impl SyncState {
    pub(crate) fn as_gauge(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Syncing => 1,
            Self::Throttled => 2,
            Self::Error => 3,
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Syncing => write!(f, "Syncing"),
            Self::Throttled => write!(f, "Throttled"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// What asked for a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTrigger {
    Manual,
    Scheduled,
    /// Connectivity came back
    Resume,
    PullToRefresh,
    /// Follow-up after a lead mutation
    StatusUpdate,
}

impl SyncTrigger {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Resume => "resume",
            Self::PullToRefresh => "pull_to_refresh",
            Self::StatusUpdate => "status_update",
        }
    }
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for a session that ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pages_synced: u32,
    pub records_written: usize,
    /// Local mutations acknowledged by the remote
    pub pushed: usize,
    /// Local mutations the remote rejected (now marked failed)
    pub failed: usize,
    /// Ids held locally but absent from a complete remote sweep. Reported,
    /// never deleted.
    pub local_only_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Success(SyncReport),
    Error(String),
    Throttled { remaining_secs: u64 },
    SkippedOffline,
    SkippedInFlight,
}

impl SyncOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Error(_) => "error",
            Self::Throttled { .. } => "throttled",
            Self::SkippedOffline => "skipped_offline",
            Self::SkippedInFlight => "skipped_in_flight",
        }
    }
}

/// One sync attempt. Returned to the caller and logged, never stored.
#[derive(Debug, Clone)]
pub struct SyncSession {
    pub id: Uuid,
    pub trigger: SyncTrigger,
    /// Epoch millis
    pub started_at: i64,
    /// Epoch millis
    pub finished_at: i64,
    pub duration: Duration,
    pub outcome: SyncOutcome,
}

/// Result shape handed to UI callers of a manual sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualSyncResult {
    pub success: bool,
    pub error: Option<String>,
}

impl From<&SyncOutcome> for ManualSyncResult {
    fn from(outcome: &SyncOutcome) -> Self {
        let error = match outcome {
            SyncOutcome::Success(_) => None,
            SyncOutcome::Error(msg) => Some(msg.clone()),
            SyncOutcome::Throttled { remaining_secs } => {
                Some(format!("sync throttled, try again in {}s", remaining_secs))
            }
            SyncOutcome::SkippedOffline => Some("offline".to_string()),
            SyncOutcome::SkippedInFlight => Some("sync already in progress".to_string()),
        };
        Self { success: error.is_none(), error }
    }
}

impl From<&SyncSession> for ManualSyncResult {
    fn from(session: &SyncSession) -> Self {
        Self::from(&session.outcome)
    }
}
