// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Errors surfaced by name resolution, metadata lookup and query compilation.

use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum QueryError {
    /// `order`/`search`/`search_any` was called before a relation was bound.
    #[error("expected relation to be bound before compiling")]
    NoRelation,

    #[error("invalid entity identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("no metadata registered for entity '{0}'")]
    UnknownEntity(String),

    #[error("'{owner}' has no association '{name}'")]
    UnknownAssociation { owner: String, name: String },

    #[error("association '{name}' cannot be translated into keys: {reason}")]
    UnsupportedAssociation { name: String, reason: String },

    #[error("cannot parse {value:?} as {semantic_type}: {reason}")]
    Parse {
        semantic_type: String,
        value: String,
        reason: String,
    },

    #[error("unsupported semantic type '{0}' for search")]
    UnsupportedType(String),

    #[error("relationship recursion exceeded maximum depth of {depth}")]
    RecursionLimit { depth: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl QueryError {
    pub(crate) fn parse(
        semantic_type: impl std::fmt::Display,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Parse {
            semantic_type: semantic_type.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}
