// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

use crate::relation::{Dialect, KeyValue, Relation};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Cannot decode column '{column}' as a key: {reason}")]
    Decode { column: String, reason: String },
}

/// Executes relations against a backing store.
///
/// The compiler only needs to pluck key columns out of bounded sub-queries;
/// everything else it does is pure composition on [`Relation`].
#[async_trait]
pub trait RelationExecutor: Send + Sync {
    /// Dialect the rendered SQL must target.
    fn dialect(&self) -> Dialect;

    /// Values of `column` for every row of `relation`, in the relation's order.
    /// NULLs come back as `None`.
    async fn pluck(
        &self,
        relation: &Relation,
        column: &str,
    ) -> Result<Vec<Option<KeyValue>>, StorageError>;
}
