// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query compiler: turns `order`/`search`/`search_any` requests into
//! conditions and orderings on a [`Relation`].
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ QueryCompiler (entity E, bound relation)                      │
//! │   TypeResolver: field → semantic type (+ association)         │
//! │                                                               │
//! │   scalar types ───────────────► clause on E's own columns     │
//! │                                                               │
//! │   association types                                           │
//! │     1. descend: sub-compiler for target T (depth + 1)         │
//! │     2. compile on T (search_any / order), pluck T's keys      │
//! │     3. correlate keys back to E (fk / join table / through)   │
//! │     4. IN (...) filter or `col = k DESC` rank ordering on E   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The only store I/O is the pluck in steps 2-3, through the injected
//! [`RelationExecutor`]. Recursion is bounded by `max_depth`; key-translation
//! sub-queries used for ordering are capped at `key_translation_limit` rows.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use query_engine::compiler::{QueryEngine, SearchOptions};
//! use query_engine::metadata::{ColumnType, EntityMetadata, MetadataCache, StaticMetadataProvider};
//! use query_engine::relation::Dialect;
//! use query_engine::storage::ScriptedExecutor;
//!
//! # tokio_test_block(async {
//! let provider = StaticMetadataProvider::new()
//!     .with_entity(EntityMetadata::new("Post").column("title", ColumnType::String));
//! let cache = Arc::new(MetadataCache::new(Arc::new(provider)));
//! let engine = QueryEngine::new(cache, Arc::new(ScriptedExecutor::new(Dialect::Postgres)));
//!
//! let posts = engine.compiler("posts").unwrap();
//! let relation = posts.search("title", "rust", &SearchOptions::default()).await.unwrap();
//! assert_eq!(
//!     relation.to_sql(Dialect::Postgres, "posts.id").sql,
//!     "SELECT posts.id FROM posts WHERE posts.title ILIKE $1"
//! );
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

mod key_translation;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Timelike;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use crate::config::QueryEngineConfig;
use crate::error::QueryError;
use crate::metadata::catalog::AssociationDescriptor;
use crate::metadata::types::{duration_is_bare_seconds, value_text, SemanticType, TypeResolver, TypedValue};
use crate::metadata::{ColumnType, Entity, MetadataCache};
use crate::metrics;
use crate::relation::{Dialect, Direction, Fragment, KeySet, KeyValue, Relation, SqlParam, SENTINEL_KEY};
use crate::storage::RelationExecutor;

/// Boxed future for compiler calls that recurse into sub-compilers.
pub type CompileFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueryError>> + Send + 'a>>;

const AGGREGATES: [&str; 5] = ["SUM(", "COUNT(", "MAX(", "MIN(", "AVG("];

/// Overrides for [`QueryCompiler::order`].
#[derive(Debug, Clone, Default)]
pub struct OrderOptions {
    /// Treat the field as this type instead of resolving it.
    pub as_type: Option<SemanticType>,
    /// Column of the related entity to sort by, instead of its default.
    pub sort_field: Option<String>,
    /// SQL expression to sort by, instead of the field's column.
    pub sql_column: Option<String>,
    /// Row cap for the related-entity sub-query (never above the engine cap).
    pub limit: Option<usize>,
    /// Drop orderings already on the relation first.
    pub reorder: bool,
}

impl OrderOptions {
    #[must_use]
    pub fn reorder() -> Self {
        Self {
            reorder: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn sort_field(mut self, field: impl Into<String>) -> Self {
        self.sort_field = Some(field.into());
        self
    }
}

/// Overrides for [`QueryCompiler::search`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub as_type: Option<SemanticType>,
    /// Substring match for text, unit widening for whole numbers (default: true).
    pub fuzzy: bool,
    pub sql_column: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            as_type: None,
            fuzzy: true,
            sql_column: None,
        }
    }
}

impl SearchOptions {
    /// Exact comparison.
    #[must_use]
    pub fn exact() -> Self {
        Self {
            fuzzy: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn as_type(mut self, semantic: SemanticType) -> Self {
        self.as_type = Some(semantic);
        self
    }

    #[must_use]
    pub fn sql_column(mut self, column: impl Into<String>) -> Self {
        self.sql_column = Some(column.into());
        self
    }
}

/// Overrides for [`QueryCompiler::search_any`].
#[derive(Debug, Clone)]
pub struct SearchAnyOptions {
    /// Columns to match; defaults to the entity's search columns.
    pub columns: Option<Vec<String>>,
    pub fuzzy: bool,
}

impl Default for SearchAnyOptions {
    fn default() -> Self {
        Self {
            columns: None,
            fuzzy: true,
        }
    }
}

/// Shared state for every compiler: metadata, executor and limits.
pub struct QueryEngine {
    cache: Arc<MetadataCache>,
    executor: Arc<dyn RelationExecutor>,
    key_translation_limit: usize,
    max_depth: usize,
}

impl QueryEngine {
    /// Engine with default limits.
    pub fn new(cache: Arc<MetadataCache>, executor: Arc<dyn RelationExecutor>) -> Self {
        Self::with_config(cache, executor, &QueryEngineConfig::default())
    }

    pub fn with_config(
        cache: Arc<MetadataCache>,
        executor: Arc<dyn RelationExecutor>,
        config: &QueryEngineConfig,
    ) -> Self {
        Self {
            cache,
            executor,
            key_translation_limit: config.key_translation_limit,
            max_depth: config.max_depth,
        }
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.executor.dialect()
    }

    #[must_use]
    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Compiler for `identifier`, bound to all of its rows.
    pub fn compiler(&self, identifier: &str) -> Result<QueryCompiler<'_>, QueryError> {
        let entity = self.cache.entity(identifier)?;
        Ok(QueryCompiler {
            engine: self,
            relation: Some(entity.relation()),
            entity,
            depth: 0,
        })
    }

    /// Compiler for `identifier` with no relation bound yet.
    pub fn unbound(&self, identifier: &str) -> Result<QueryCompiler<'_>, QueryError> {
        Ok(QueryCompiler {
            engine: self,
            entity: self.cache.entity(identifier)?,
            relation: None,
            depth: 0,
        })
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("dialect", &self.dialect())
            .field("key_translation_limit", &self.key_translation_limit)
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

/// Compiles requests against one entity's relation.
///
/// Every operation returns a new, refined [`Relation`] and leaves the bound
/// one untouched; rebind with [`QueryCompiler::bind`] to chain.
#[derive(Debug, Clone)]
pub struct QueryCompiler<'e> {
    engine: &'e QueryEngine,
    entity: Arc<Entity>,
    relation: Option<Relation>,
    depth: usize,
}

impl<'e> QueryCompiler<'e> {
    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    #[must_use]
    pub fn relation(&self) -> Option<&Relation> {
        self.relation.as_ref()
    }

    #[must_use]
    pub fn bind(mut self, relation: Relation) -> Self {
        self.relation = Some(relation);
        self
    }

    #[must_use]
    pub fn into_relation(self) -> Option<Relation> {
        self.relation
    }

    #[must_use]
    pub fn resolver(&self) -> TypeResolver<'_> {
        TypeResolver::new(&self.entity)
    }

    fn bound(&self) -> Result<&Relation, QueryError> {
        self.relation.as_ref().ok_or(QueryError::NoRelation)
    }

    fn dialect(&self) -> Dialect {
        self.engine.dialect()
    }

    fn own_key(&self) -> String {
        self.entity.qualified(self.entity.primary_key())
    }

    /// Sub-compiler for a related entity, bound to all of its rows.
    fn descend(&self, type_name: &str) -> Result<QueryCompiler<'e>, QueryError> {
        let depth = self.depth + 1;
        if depth > self.engine.max_depth {
            return Err(QueryError::RecursionLimit {
                depth: self.engine.max_depth,
            });
        }
        let entity = self.engine.cache.entity(type_name)?;
        debug!(from = %self.entity.type_name(), to = %entity.type_name(), depth, "descending into related entity");
        Ok(QueryCompiler {
            engine: self.engine,
            relation: Some(entity.relation()),
            entity,
            depth,
        })
    }

    fn require<'a>(
        &self,
        field: &str,
        association: Option<&'a AssociationDescriptor>,
    ) -> Result<&'a AssociationDescriptor, QueryError> {
        association.ok_or_else(|| QueryError::UnknownAssociation {
            owner: self.entity.type_name().to_string(),
            name: field.to_string(),
        })
    }

    // =========================================================================
    // order
    // =========================================================================

    /// Sort by `field`.
    ///
    /// Associations sort by the related entity's own ordering, translated to
    /// a rank over this entity's keys.
    #[tracing::instrument(skip_all, fields(entity = %self.entity.type_name(), field, ?direction))]
    pub async fn order(
        &self,
        field: &str,
        direction: Direction,
        options: &OrderOptions,
    ) -> Result<Relation, QueryError> {
        self.order_impl(field, direction, options).await
    }

    fn order_nested<'a>(
        &'a self,
        field: &'a str,
        direction: Direction,
        options: &'a OrderOptions,
    ) -> CompileFuture<'a, Relation> {
        Box::pin(self.order_impl(field, direction, options))
    }

    async fn order_impl(
        &self,
        field: &str,
        direction: Direction,
        options: &OrderOptions,
    ) -> Result<Relation, QueryError> {
        let mut relation = self.bound()?.clone();
        let resolver = self.resolver();
        let resolved = match options.as_type {
            Some(semantic) => resolver.resolve_as(field, semantic),
            None => resolver.resolve(field),
        };
        let column = options
            .sql_column
            .clone()
            .unwrap_or_else(|| self.entity.sql_column(field));
        let dialect = self.dialect();
        let dir = direction.as_sql();

        metrics::record_compile("order", resolved.semantic.as_str());
        debug!(entity = %self.entity.type_name(), field, semantic_type = %resolved.semantic, column = %column, "compiling order");

        if options.reorder {
            relation = relation.reorder();
        }

        let relation = match resolved.semantic {
            SemanticType::DirectReference => {
                let association = self.require(field, resolved.association)?;
                let ranked = self.rank_by_association(association, direction, options).await?;
                relation
                    .order(format!("{column} IS NULL DESC"))
                    .order_opt(ranked)
            }
            SemanticType::PolymorphicReference => relation
                .order(format!("{column}_type {dir}"))
                .order(format!("{column}_id {dir}")),
            SemanticType::ReversedSingle | SemanticType::ReversedMany | SemanticType::ManyToMany => {
                let association = self.require(field, resolved.association)?;
                let ranked = self.rank_by_association(association, direction, options).await?;
                relation
                    .order_opt(ranked)
                    .order(format!("{} {dir}", self.own_key()))
            }
            SemanticType::Addresses => {
                let ranked = self.rank_by_addresses(field, direction, options).await?;
                relation
                    .order_opt(ranked)
                    .order(format!("{} {dir}", self.own_key()))
            }
            SemanticType::Roles => {
                relation.order(format!("{} {dir}", self.entity.qualified("roles_mask")))
            }
            SemanticType::String | SemanticType::Text | SemanticType::Email => {
                relation.order(dialect.order_text(&column, direction))
            }
            SemanticType::Time => relation.order(dialect.order_time(&column, direction)),
            _ => relation.order(dialect.order_nulls_last(&column, direction)),
        };

        Ok(relation)
    }

    // =========================================================================
    // search
    // =========================================================================

    /// Filter rows where `field` matches `value`.
    #[tracing::instrument(skip_all, fields(entity = %self.entity.type_name(), field))]
    pub async fn search(
        &self,
        field: &str,
        value: impl Into<Value>,
        options: &SearchOptions,
    ) -> Result<Relation, QueryError> {
        let value = value.into();
        let relation = self.bound()?.clone();
        let column = options
            .sql_column
            .clone()
            .unwrap_or_else(|| self.entity.sql_column(field));

        let upper = column.to_ascii_uppercase();
        if AGGREGATES.iter().any(|aggregate| upper.contains(aggregate)) {
            metrics::record_compile("search", "aggregate");
            return Ok(relation.having(Fragment::with_params(
                format!("{column} = ?"),
                vec![json_param(&value)],
            )));
        }

        let resolver = self.resolver();
        let resolved = match options.as_type {
            Some(semantic) => resolver.resolve_as(field, semantic),
            None => resolver.resolve(field),
        };
        let semantic = resolved.semantic;
        let term = resolver.parse(semantic, &value)?;
        let raw = value_text(&value);

        metrics::record_compile("search", semantic.as_str());
        debug!(entity = %self.entity.type_name(), field, semantic_type = %semantic, column = %column, "compiling search");

        if term.is_null() && semantic.accepts_null_filter() {
            return Ok(relation.filter(format!("{column} IS NULL")));
        }

        let dialect = self.dialect();
        let eq = |param: SqlParam| Fragment::with_params(format!("{column} = ?"), vec![param]);

        let condition = match (semantic, term) {
            (semantic, _) if semantic.is_association() => {
                let association = self.require(field, resolved.association)?;
                self.filter_by_association(association, &value, options.fuzzy)
                    .await?
            }

            (SemanticType::PolymorphicReference, _) => polymorphic_condition(&column, &raw),

            (SemanticType::Addresses, _) => self.filter_by_addresses(field, &value, options.fuzzy).await?,

            // An unchanged token did not decode; match nothing rather than fail.
            (SemanticType::ObfuscatedId, TypedValue::Integer(id)) => eq(SqlParam::Integer(id)),
            (SemanticType::ObfuscatedId, _) => eq(SqlParam::Integer(SENTINEL_KEY)),

            (SemanticType::Roles, TypedValue::Integer(mask)) => Fragment::with_params(
                format!("({} & ?) > 0", self.entity.qualified("roles_mask")),
                vec![SqlParam::Integer(mask)],
            ),
            (SemanticType::Roles, _) => {
                return Err(QueryError::parse(semantic, raw, "no roles given"));
            }

            (SemanticType::Boolean, TypedValue::Boolean(b)) => eq(SqlParam::Boolean(b)),
            (SemanticType::Integer | SemanticType::Price, TypedValue::Integer(n)) => {
                eq(SqlParam::Integer(n))
            }

            (SemanticType::Date | SemanticType::Datetime, TypedValue::Timestamp { at, precision }) => {
                let end = precision
                    .bucket_end(at)
                    .ok_or_else(|| QueryError::parse(semantic, raw.as_str(), "date out of range"))?;
                let (start, end, placeholder) = if semantic == SemanticType::Date {
                    (
                        at.format("%Y-%m-%d").to_string(),
                        end.format("%Y-%m-%d").to_string(),
                        dialect.date_placeholder(),
                    )
                } else {
                    (
                        at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        end.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
                        dialect.timestamp_placeholder(),
                    )
                };
                Fragment::with_params(
                    format!("{column} >= {placeholder} AND {column} <= {placeholder}"),
                    vec![SqlParam::Text(start), SqlParam::Text(end)],
                )
            }

            (SemanticType::Time, TypedValue::Time(time)) => {
                let hour = Fragment::with_params(
                    format!("{} = ?", dialect.extract_hour(&column)),
                    vec![SqlParam::Integer(i64::from(time.hour()))],
                );
                if time.minute() > 0 {
                    let minute = Fragment::with_params(
                        format!("{} = ?", dialect.extract_minute(&column)),
                        vec![SqlParam::Integer(i64::from(time.minute()))],
                    );
                    Fragment::join(vec![hour, minute], " AND ")
                } else {
                    hour
                }
            }

            (SemanticType::Percentage, TypedValue::Decimal(d))
                if self.entity.column_type(field) == Some(ColumnType::Integer) =>
            {
                let scaled = d
                    .checked_mul(Decimal::ONE_HUNDRED)
                    .and_then(|scaled| scaled.trunc().to_i64())
                    .ok_or_else(|| QueryError::parse(semantic, raw.as_str(), "out of range"))?;
                eq(SqlParam::Integer(scaled))
            }

            (
                SemanticType::Decimal
                | SemanticType::Float
                | SemanticType::Currency
                | SemanticType::Percentage,
                TypedValue::Decimal(d),
            ) => {
                let negative = d < Decimal::ZERO;
                let bound = if negative {
                    d.checked_sub(Decimal::ONE)
                } else {
                    d.checked_add(Decimal::ONE)
                };
                let whole = d.fract().is_zero() && !raw.contains('.');
                match bound {
                    Some(bound) if options.fuzzy && whole => {
                        widened(&column, decimal_param(d), decimal_param(bound), negative)
                    }
                    _ => eq(decimal_param(d)),
                }
            }

            (SemanticType::Duration, TypedValue::Duration(seconds)) => {
                let negative = seconds < 0;
                let bound = if negative {
                    seconds.checked_sub(60)
                } else {
                    seconds.checked_add(60)
                };
                match bound {
                    Some(bound) if options.fuzzy && seconds % 60 == 0 && duration_is_bare_seconds(&raw) => {
                        widened(&column, SqlParam::Integer(seconds), SqlParam::Integer(bound), negative)
                    }
                    _ => eq(SqlParam::Integer(seconds)),
                }
            }

            (SemanticType::String | SemanticType::Text | SemanticType::Email, TypedValue::Text(text)) => {
                if options.fuzzy {
                    Fragment::with_params(
                        format!("{column} {} ?", dialect.fuzzy_operator()),
                        vec![SqlParam::Text(format!("%{text}%"))],
                    )
                } else {
                    eq(SqlParam::Text(text))
                }
            }

            (semantic, _) => return Err(QueryError::UnsupportedType(semantic.to_string())),
        };

        Ok(relation.filter(condition))
    }

    // =========================================================================
    // search_any
    // =========================================================================

    /// Filter by primary key when `value` is an id (or list of ids), else
    /// match it against every search column, OR-combined.
    pub fn search_any(
        &self,
        value: impl Into<Value>,
        options: &SearchAnyOptions,
    ) -> Result<Relation, QueryError> {
        let value = value.into();
        let relation = self.bound()?.clone();

        if let Some(keys) = key_list(&value) {
            metrics::record_compile("search_any", "key");
            return Ok(relation.filter(keys.in_list(&self.own_key())));
        }

        metrics::record_compile("search_any", "text");
        let text = value_text(&value);
        let columns = options
            .columns
            .clone()
            .unwrap_or_else(|| self.entity.search_columns());
        if columns.is_empty() {
            return Ok(relation.filter(Fragment::never()));
        }

        let operator = self.dialect().fuzzy_operator();
        let conditions = columns
            .iter()
            .map(|name| {
                let column = self.entity.sql_column(name);
                if options.fuzzy {
                    Fragment::with_params(
                        format!("{column} {operator} ?"),
                        vec![SqlParam::Text(format!("%{text}%"))],
                    )
                } else {
                    Fragment::with_params(format!("{column} = ?"), vec![SqlParam::Text(text.clone())])
                }
            })
            .collect();

        Ok(relation.filter(Fragment::join(conditions, " OR ")))
    }
}

/// `Type_12` → type and id; anything else matches either column.
fn polymorphic_condition(column: &str, raw: &str) -> Fragment {
    if let Some((type_name, id)) = raw.rsplit_once('_') {
        if let (false, Ok(id)) = (type_name.is_empty(), id.trim().parse::<i64>()) {
            return Fragment::with_params(
                format!("{column}_id = ? AND {column}_type = ?"),
                vec![SqlParam::Integer(id), SqlParam::Text(type_name.to_string())],
            );
        }
    }
    let id = raw.trim().parse::<i64>().unwrap_or(SENTINEL_KEY);
    Fragment::with_params(
        format!("{column}_id = ? OR {column}_type = ?"),
        vec![SqlParam::Integer(id), SqlParam::Text(raw.to_string())],
    )
}

/// `[value, bound)`, or `(bound, value]` for negative values.
fn widened(column: &str, value: SqlParam, bound: SqlParam, negative: bool) -> Fragment {
    if negative {
        Fragment::with_params(format!("{column} <= ? AND {column} > ?"), vec![value, bound])
    } else {
        Fragment::with_params(format!("{column} >= ? AND {column} < ?"), vec![value, bound])
    }
}

fn decimal_param(d: Decimal) -> SqlParam {
    match d.to_f64() {
        Some(f) => SqlParam::Float(f),
        None => SqlParam::Text(d.to_string()),
    }
}

fn json_param(value: &Value) -> SqlParam {
    match value {
        Value::Bool(b) => SqlParam::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlParam::Integer(i),
            None => SqlParam::Float(n.as_f64().unwrap_or_default()),
        },
        other => SqlParam::Text(value_text(other)),
    }
}

/// Primary keys named by an integer, an integer-looking string or an array.
fn key_list(value: &Value) -> Option<KeySet> {
    match value {
        Value::Number(n) => n.as_i64().map(|id| std::iter::once(KeyValue::Integer(id)).collect()),
        Value::String(s) => s
            .parse::<i64>()
            .ok()
            .filter(|id| id.to_string() == *s)
            .map(|id| std::iter::once(KeyValue::Integer(id)).collect()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| match item {
                    Value::Number(n) => n.as_i64().map(KeyValue::Integer),
                    Value::String(s) => Some(
                        s.parse::<i64>()
                            .map_or_else(|_| KeyValue::Text(s.clone()), KeyValue::Integer),
                    ),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    }
}
