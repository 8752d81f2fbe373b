// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable page store backends.
//!
//! - [`sql::SqlPageStore`]: SQLite, the on-device store
//! - [`memory::InMemoryPageStore`]: process-local, for tests and ephemeral hosts

pub mod traits;
pub mod sql;
pub mod memory;
