// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Executors that run compiled relations.
//!
//! - [`SqlExecutor`]: sqlx `Any` pool (MySQL, PostgreSQL, SQLite)
//! - [`ScriptedExecutor`]: in-memory, scripted pluck results for tests
//! - [`with_rollback`]: run work inside a transaction that is always rolled back

mod memory;
mod sql;
mod traits;

pub use memory::ScriptedExecutor;
pub use sql::{with_rollback, SandboxFuture, SqlExecutor};
pub use traits::{RelationExecutor, StorageError};
