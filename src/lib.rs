// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Query Engine
//!
//! Metadata-driven search and sort compiler for relational entities.
//!
//! Given an entity identifier and a field name, the engine works out what the
//! field *is* (a text column, a date, a reference to another entity, a
//! many-to-many link, ...) and compiles a search value or sort direction into
//! conditions and orderings on a composable [`Relation`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Naming: "admin/posts"                      │
//! │  • EntityReference: Admin::Post, admin_posts, post_id      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Metadata cache                          │
//! │  • Columns, keys, default sort (EntityMetadataProvider)    │
//! │  • Association catalog, built once per entity              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Query compiler                          │
//! │  • TypeResolver: field → semantic type                     │
//! │  • order / search / search_any → Relation                  │
//! │  • Key translation across associations (bounded plucks)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                    (pluck via RelationExecutor)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               MySQL / PostgreSQL / SQLite                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use query_engine::{
//!     Direction, MetadataCache, OrderOptions, QueryEngine, QueryEngineConfig, SearchOptions,
//!     SqlExecutor, StaticMetadataProvider,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = QueryEngineConfig {
//!         database_url: Some("sqlite::memory:".into()),
//!         ..Default::default()
//!     };
//!     let executor = SqlExecutor::connect(&config).await?;
//!
//!     let provider = StaticMetadataProvider::from_json(&std::fs::read_to_string("entities.json")?)?;
//!     let cache = Arc::new(MetadataCache::new(Arc::new(provider)));
//!     let engine = QueryEngine::with_config(cache, Arc::new(executor), &config);
//!
//!     let posts = engine.compiler("posts")?;
//!     let relation = posts.search("author", "ada", &SearchOptions::default()).await?;
//!     let relation = posts
//!         .bind(relation)
//!         .order("published_at", Direction::Desc, &OrderOptions::default())
//!         .await?;
//!
//!     println!("{}", relation.to_sql_inline("posts.id"));
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`naming`]: Entity identifiers and inflection
//! - [`metadata`]: Metadata provider, cache, association catalog, semantic types
//! - [`compiler`]: [`QueryEngine`] and [`QueryCompiler`]
//! - [`relation`]: Composable relations, SQL dialects, key sets
//! - [`storage`]: Executors (sqlx `Any` pool, scripted) and rollback sandbox
//! - [`resilience`]: Retry for pool establishment

pub mod compiler;
pub mod config;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod naming;
pub mod relation;
pub mod resilience;
pub mod storage;

pub use compiler::{OrderOptions, QueryCompiler, QueryEngine, SearchAnyOptions, SearchOptions};
pub use config::QueryEngineConfig;
pub use error::QueryError;
pub use metadata::types::{SemanticType, TypeResolver, TypedValue};
pub use metadata::{
    AssociationDefinition, ColumnType, Entity, EntityMetadata, EntityMetadataProvider, MetadataCache,
    StaticMetadataProvider,
};
pub use naming::EntityReference;
pub use relation::{Dialect, Direction, Fragment, Relation, SqlParam};
pub use storage::{RelationExecutor, ScriptedExecutor, SqlExecutor, StorageError};
