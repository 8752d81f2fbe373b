// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Contract for the remote lead source.
//!
//! The engine never talks HTTP itself. The host supplies a
//! [`RemoteLeadSource`] whose errors arrive already classified, so the
//! engine can decide between cache fallback and surfacing the failure.
//! Transport timeouts and retry budgets belong to the implementation.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::lead::LeadPatch;

/// One page of raw payloads as returned by the remote source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemotePage {
    /// Unvalidated lead payloads
    pub items: Vec<Value>,
    /// Total leads available remotely
    pub total: u64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network unreachable: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    /// 4xx: the request itself is at fault
    #[error("request rejected ({status}): {message}")]
    Client { status: u16, message: String },
    /// 5xx: the server is at fault
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("request cancelled")]
    Cancelled,
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RemoteError {
    /// Build from an HTTP status code.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status >= 500 {
            Self::Server { status, message }
        } else {
            Self::Client { status, message }
        }
    }

    /// Connectivity-class failures: worth retrying later, and lookups may
    /// fall back to the local store.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout | Self::Server { .. })
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[async_trait]
pub trait RemoteLeadSource: Send + Sync {
    async fn fetch(&self, offset: usize, limit: usize) -> Result<RemotePage, RemoteError>;

    async fn fetch_by_id(&self, id: &str) -> Result<Value, RemoteError>;

    /// Apply a patch remotely and return the updated lead payload.
    async fn update_lead(&self, id: &str, patch: &LeadPatch) -> Result<Value, RemoteError>;
}
