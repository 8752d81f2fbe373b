// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backoff for store start-up. User-facing operations are never retried
//! automatically; retries there are caller-initiated.

pub mod retry;
