// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lead record data structure.
//!
//! The [`LeadRecord`] is the unit that flows through the engine. Remote
//! payloads are untyped JSON; [`LeadRecord::from_remote`] validates each one
//! explicitly and returns a [`RecordRejection`] instead of coercing bad data.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Pipeline stage of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Proposal,
    Negotiation,
    Won,
    Lost,
}

impl LeadStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Qualified => "qualified",
            Self::Proposal => "proposal",
            Self::Negotiation => "negotiation",
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "contacted" => Ok(Self::Contacted),
            "qualified" => Ok(Self::Qualified),
            "proposal" => Ok(Self::Proposal),
            "negotiation" => Ok(Self::Negotiation),
            "won" => Ok(Self::Won),
            "lost" => Ok(Self::Lost),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl FromStr for LeadPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// Whether local state has reached the remote source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Synced,
    /// Local change waiting to be pushed
    Pending,
    /// Remote rejected the local change (non-retryable)
    Failed,
}

impl SyncStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync status '{}'", other)),
        }
    }
}

/// Why a remote payload was not accepted as a [`LeadRecord`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordRejection {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing or empty id")]
    MissingId,
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

/// A field-level change to a lead, applied locally and pushed to the remote.
///
/// `None` means "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LeadStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<LeadPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl LeadPatch {
    #[must_use]
    pub fn status(status: LeadStatus) -> Self {
        Self { status: Some(status), ..Default::default() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Combine with a later patch; fields set in `newer` win.
    #[must_use]
    pub fn merge(self, newer: LeadPatch) -> LeadPatch {
        LeadPatch {
            status: newer.status.or(self.status),
            priority: newer.priority.or(self.priority),
            name: newer.name.or(self.name),
            company: newer.company.or(self.company),
            email: newer.email.or(self.email),
            phone: newer.phone.or(self.phone),
            notes: newer.notes.or(self.notes),
        }
    }

    pub fn apply_to(&self, record: &mut LeadRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(priority) = self.priority {
            record.priority = priority;
        }
        if let Some(ref name) = self.name {
            record.name = name.clone();
        }
        if let Some(ref company) = self.company {
            record.company = Some(company.clone());
        }
        if let Some(ref email) = self.email {
            record.email = Some(email.clone());
        }
        if let Some(ref phone) = self.phone {
            record.phone = Some(phone.clone());
        }
        if let Some(ref notes) = self.notes {
            record.notes = Some(notes.clone());
        }
    }
}

/// A sales lead as held by the cache and the durable store.
///
/// # Example
///
/// ```
/// use lead_sync::{LeadRecord, LeadStatus, SyncStatus};
/// use serde_json::json;
///
/// let lead = LeadRecord::from_remote(&json!({
///     "id": "L1",
///     "name": "Acme Roofing",
///     "status": "qualified",
///     "created_at": 1_700_000_000_000i64,
/// })).unwrap();
///
/// assert_eq!(lead.status, LeadStatus::Qualified);
/// assert_eq!(lead.sync_status, SyncStatus::Synced);
/// assert_eq!(lead.updated_at, lead.created_at);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: String,
    pub status: LeadStatus,
    #[serde(default)]
    pub priority: LeadPriority,
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Epoch millis
    pub created_at: i64,
    /// Epoch millis, drives the stale-write guard
    pub updated_at: i64,
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// Patch not yet acknowledged by the remote source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_changes: Option<LeadPatch>,
}

pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl LeadRecord {
    /// Create a fresh, synced lead stamped with the current time.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            status: LeadStatus::New,
            priority: LeadPriority::default(),
            name: name.into(),
            company: None,
            email: None,
            phone: None,
            notes: None,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Synced,
            local_changes: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: LeadStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_updated_at(mut self, updated_at: i64) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// True when `self` may replace `existing` under the stale-write guard.
    /// Equal timestamps replace, so re-applying a page is idempotent.
    #[must_use]
    pub fn supersedes(&self, existing: &LeadRecord) -> bool {
        self.updated_at >= existing.updated_at
    }

    /// Validate a remote JSON payload.
    pub fn from_remote(value: &Value) -> Result<Self, RecordRejection> {
        let obj = value.as_object().ok_or(RecordRejection::NotAnObject)?;

        let id = match obj.get("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) if n.is_u64() || n.is_i64() => n.to_string(),
            _ => return Err(RecordRejection::MissingId),
        };

        let name = match opt_string(obj, "name")? {
            Some(name) if !name.trim().is_empty() => name,
            _ => return Err(RecordRejection::MissingField("name")),
        };

        let status = match opt_string(obj, "status")? {
            Some(s) => s.parse::<LeadStatus>().map_err(|reason| RecordRejection::InvalidField { field: "status", reason })?,
            None => LeadStatus::New,
        };

        let priority = match opt_string(obj, "priority")? {
            Some(s) => s.parse::<LeadPriority>().map_err(|reason| RecordRejection::InvalidField { field: "priority", reason })?,
            None => LeadPriority::default(),
        };

        let email = opt_string(obj, "email")?;
        if let Some(ref email) = email {
            if !email.contains('@') {
                return Err(RecordRejection::InvalidField {
                    field: "email",
                    reason: format!("'{}' is not an address", email),
                });
            }
        }

        let created_at = opt_millis(obj, "created_at")?.ok_or(RecordRejection::MissingField("created_at"))?;
        let updated_at = opt_millis(obj, "updated_at")?.unwrap_or(created_at);

        Ok(Self {
            id,
            status,
            priority,
            name,
            company: opt_string(obj, "company")?,
            email,
            phone: opt_string(obj, "phone")?,
            notes: opt_string(obj, "notes")?,
            created_at,
            updated_at,
            sync_status: SyncStatus::Synced,
            local_changes: None,
        })
    }
}

fn opt_string(obj: &Map<String, Value>, field: &'static str) -> Result<Option<String>, RecordRejection> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(RecordRejection::InvalidField {
            field,
            reason: format!("expected string, got {}", other),
        }),
    }
}

fn opt_millis(obj: &Map<String, Value>, field: &'static str) -> Result<Option<i64>, RecordRejection> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(ms) if ms >= 0 => Ok(Some(ms)),
            _ => Err(RecordRejection::InvalidField {
                field,
                reason: format!("expected non-negative epoch millis, got {}", n),
            }),
        },
        Some(other) => Err(RecordRejection::InvalidField {
            field,
            reason: format!("expected epoch millis, got {}", other),
        }),
    }
}

/// Validate a page of remote payloads, dropping (and logging) bad items so
/// one malformed record does not discard the rest of the page.
pub fn accept_remote_batch(items: &[Value]) -> Vec<LeadRecord> {
    let mut accepted = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match LeadRecord::from_remote(item) {
            Ok(record) => accepted.push(record),
            Err(reason) => {
                warn!(index, %reason, "Dropping malformed remote lead");
                crate::metrics::record_rejected_record(&reason);
            }
        }
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote(id: &str) -> Value {
        json!({
            "id": id,
            "name": "Acme Roofing",
            "status": "Contacted",
            "priority": "high",
            "email": "buyer@acme.test",
            "created_at": 1_000,
            "updated_at": 2_000,
        })
    }

    #[test]
    fn test_from_remote_valid() {
        let lead = LeadRecord::from_remote(&remote("L1")).unwrap();

        assert_eq!(lead.id, "L1");
        assert_eq!(lead.status, LeadStatus::Contacted);
        assert_eq!(lead.priority, LeadPriority::High);
        assert_eq!(lead.email.as_deref(), Some("buyer@acme.test"));
        assert_eq!(lead.created_at, 1_000);
        assert_eq!(lead.updated_at, 2_000);
        assert_eq!(lead.sync_status, SyncStatus::Synced);
        assert!(lead.local_changes.is_none());
    }

    #[test]
    fn test_numeric_id_is_accepted() {
        let lead = LeadRecord::from_remote(&json!({"id": 42, "name": "N", "created_at": 1})).unwrap();
        assert_eq!(lead.id, "42");
        assert_eq!(lead.status, LeadStatus::New);
        assert_eq!(lead.priority, LeadPriority::Medium);
    }

    #[test]
    fn test_rejections() {
        assert_eq!(LeadRecord::from_remote(&json!([1, 2])), Err(RecordRejection::NotAnObject));
        assert_eq!(
            LeadRecord::from_remote(&json!({"name": "x", "created_at": 1})),
            Err(RecordRejection::MissingId)
        );
        assert_eq!(
            LeadRecord::from_remote(&json!({"id": "  ", "name": "x", "created_at": 1})),
            Err(RecordRejection::MissingId)
        );
        assert_eq!(
            LeadRecord::from_remote(&json!({"id": "L1", "created_at": 1})),
            Err(RecordRejection::MissingField("name"))
        );
        assert_eq!(
            LeadRecord::from_remote(&json!({"id": "L1", "name": "x"})),
            Err(RecordRejection::MissingField("created_at"))
        );
        assert!(matches!(
            LeadRecord::from_remote(&json!({"id": "L1", "name": "x", "created_at": 1, "status": "maybe"})),
            Err(RecordRejection::InvalidField { field: "status", .. })
        ));
        assert!(matches!(
            LeadRecord::from_remote(&json!({"id": "L1", "name": "x", "created_at": 1, "email": "nope"})),
            Err(RecordRejection::InvalidField { field: "email", .. })
        ));
        assert!(matches!(
            LeadRecord::from_remote(&json!({"id": "L1", "name": "x", "created_at": "yesterday"})),
            Err(RecordRejection::InvalidField { field: "created_at", .. })
        ));
    }

    #[test]
    fn test_accept_remote_batch_filters_bad_items() {
        let items = vec![remote("L1"), json!({"name": "no id"}), remote("L2"), json!("garbage")];
        let accepted = accept_remote_batch(&items);

        let ids: Vec<_> = accepted.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["L1", "L2"]);
    }

    #[test]
    fn test_patch_apply_and_merge() {
        let mut lead = LeadRecord::new("L1", "Acme");
        let first = LeadPatch { status: Some(LeadStatus::Qualified), notes: Some("call back".into()), ..Default::default() };
        let second = LeadPatch { status: Some(LeadStatus::Won), ..Default::default() };

        let merged = first.merge(second);
        assert_eq!(merged.status, Some(LeadStatus::Won));
        assert_eq!(merged.notes.as_deref(), Some("call back"));

        merged.apply_to(&mut lead);
        assert_eq!(lead.status, LeadStatus::Won);
        assert_eq!(lead.notes.as_deref(), Some("call back"));
        assert_eq!(lead.name, "Acme");
    }

    #[test]
    fn test_empty_patch() {
        assert!(LeadPatch::default().is_empty());
        assert!(!LeadPatch::status(LeadStatus::Lost).is_empty());
    }

    #[test]
    fn test_supersedes() {
        let old = LeadRecord::new("L1", "A").with_updated_at(100);
        let same = LeadRecord::new("L1", "B").with_updated_at(100);
        let newer = LeadRecord::new("L1", "C").with_updated_at(200);

        assert!(newer.supersedes(&old));
        assert!(same.supersedes(&old));
        assert!(!old.supersedes(&newer));
    }

    #[test]
    fn test_sync_status_round_trips_through_str() {
        for status in [SyncStatus::Synced, SyncStatus::Pending, SyncStatus::Failed] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
    }
}
