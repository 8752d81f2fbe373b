// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy surfaced to the UI/business layer.
//!
//! Soft outcomes are not errors here: a throttled or offline sync is a
//! [`crate::SyncOutcome`], an offline or redundant page load is a
//! [`crate::LoadOutcome`], and "no data anywhere" is
//! [`crate::CacheMiss`].

use thiserror::Error;

use crate::remote::RemoteError;
use crate::storage::traits::StorageError;

#[derive(Error, Debug)]
pub enum LeadSyncError {
    /// Connectivity-class remote failure; retry later.
    #[error("transient network error: {0}")]
    TransientNetwork(RemoteError),

    /// The request or payload is at fault; retrying will not help.
    #[error("validation error: {0}")]
    Validation(String),

    /// Durable store failure, already rolled back.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("operation cancelled")]
    Cancelled,
}

impl LeadSyncError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::Storage(_))
    }
}

impl From<RemoteError> for LeadSyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Cancelled => Self::Cancelled,
            e if e.is_transient() => Self::TransientNetwork(e),
            e => Self::Validation(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_mapping() {
        assert!(matches!(
            LeadSyncError::from(RemoteError::Timeout),
            LeadSyncError::TransientNetwork(RemoteError::Timeout)
        ));
        assert!(matches!(
            LeadSyncError::from(RemoteError::from_status(502, "bad gateway")),
            LeadSyncError::TransientNetwork(_)
        ));
        assert!(matches!(
            LeadSyncError::from(RemoteError::from_status(422, "bad field")),
            LeadSyncError::Validation(_)
        ));
        assert!(matches!(
            LeadSyncError::from(RemoteError::Cancelled),
            LeadSyncError::Cancelled
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(LeadSyncError::TransientNetwork(RemoteError::Timeout).is_retryable());
        assert!(LeadSyncError::Storage(StorageError::Backend("disk".into())).is_retryable());
        assert!(!LeadSyncError::Validation("nope".into()).is_retryable());
        assert!(!LeadSyncError::Cancelled.is_retryable());
    }
}
