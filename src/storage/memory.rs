// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::traits::{RelationExecutor, StorageError};
use crate::relation::{Dialect, KeyValue, Relation};

/// In-memory executor that answers plucks from a script instead of a database.
///
/// Responses are queued per table and consumed in order; a pluck against a
/// table with nothing queued returns no rows. Every pluck is recorded as
/// inline SQL so tests can assert on the sub-queries the compiler issued.
pub struct ScriptedExecutor {
    dialect: Dialect,
    responses: DashMap<String, VecDeque<Vec<Option<KeyValue>>>>,
    log: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            responses: DashMap::new(),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Queue the result of the next pluck against `table`.
    pub fn respond(&self, table: &str, keys: Vec<Option<KeyValue>>) -> &Self {
        self.responses
            .entry(table.to_string())
            .or_default()
            .push_back(keys);
        self
    }

    /// Queue integer keys (no NULLs) for the next pluck against `table`.
    pub fn respond_ids(&self, table: &str, ids: &[i64]) -> &Self {
        self.respond(table, ids.iter().map(|id| Some(KeyValue::Integer(*id))).collect())
    }

    /// Inline SQL of every pluck issued so far.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl RelationExecutor for ScriptedExecutor {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn pluck(
        &self,
        relation: &Relation,
        column: &str,
    ) -> Result<Vec<Option<KeyValue>>, StorageError> {
        self.log.lock().push(relation.to_sql_inline(column));

        Ok(self
            .responses
            .get_mut(relation.table())
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_default())
    }
}
