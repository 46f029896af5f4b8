// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! sqlx-backed executor.
//!
//! Uses the `Any` driver so one binary can target MySQL, PostgreSQL or SQLite;
//! the dialect is detected from the URL scheme unless configured.
//!
//! ## sqlx Any Driver Quirks
//!
//! - Parameters are bound per [`SqlParam`] variant (`i64`, `f64`, `String`, `bool`);
//!   there is no native decimal or timestamp binding, so those travel as text
//!   or float and the dialect adds casts where the engine needs them.
//! - MySQL `TEXT` columns decode as bytes, so text keys fall back to
//!   `Vec<u8>` and UTF-8 conversion.

use std::future::Future;
use std::pin::Pin;
use std::sync::Once;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::{Any, AnyConnection, AnyPool, Row};
use tracing::{debug, warn};

use super::traits::{RelationExecutor, StorageError};
use crate::config::QueryEngineConfig;
use crate::metrics;
use crate::relation::{Dialect, KeyValue, Relation, SqlParam};
use crate::resilience::retry::{retry, RetryPolicy};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Future returned by work run inside [`with_rollback`].
pub type SandboxFuture<'c, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>;

/// Run `work` on a connection inside a transaction that is rolled back
/// afterwards, whatever the outcome.
///
/// Anything `work` writes through the connection it is handed is undone.
/// Writes issued through some other connection are not covered.
pub async fn with_rollback<T, E, F>(pool: &AnyPool, work: F) -> Result<T, E>
where
    F: for<'c> FnOnce(&'c mut AnyConnection) -> SandboxFuture<'c, T, E>,
    E: From<StorageError>,
{
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::Backend(format!("Failed to open sandbox transaction: {e}")))?;

    // If `work` panics the transaction guard is dropped, which also rolls back.
    let outcome = work(&mut *tx).await;

    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "sandbox rollback failed; connection will be discarded");
    }

    outcome
}

pub struct SqlExecutor {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlExecutor {
    /// Connect using the startup retry policy (fails fast if the URL is wrong).
    pub async fn connect(config: &QueryEngineConfig) -> Result<Self, StorageError> {
        install_drivers();

        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StorageError::Backend("database_url is not configured".to_string()))?;
        let dialect = config
            .resolved_dialect()
            .ok_or_else(|| StorageError::Backend(format!("Cannot infer SQL dialect from '{url}'")))?;

        let pool = retry("sql_connect", &RetryPolicy::connect(config.connect_attempts), || async {
            AnyPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        debug!(%dialect, "connected");
        Ok(Self { pool, dialect })
    }

    /// Wrap an existing pool (the caller vouches for `dialect`).
    #[must_use]
    pub fn from_pool(pool: AnyPool, dialect: Dialect) -> Self {
        install_drivers();
        Self { pool, dialect }
    }

    /// Get the connection pool, e.g. for scope probing.
    #[must_use]
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    fn bind_all<'q>(
        sql: &'q str,
        params: &[SqlParam],
    ) -> sqlx::query::Query<'q, Any, AnyArguments<'q>> {
        params.iter().fold(sqlx::query(sql), |query, param| match param {
            SqlParam::Text(s) => query.bind(s.clone()),
            SqlParam::Integer(n) => query.bind(*n),
            SqlParam::Float(f) => query.bind(*f),
            SqlParam::Boolean(b) => query.bind(*b),
        })
    }

    fn decode_key(row: &AnyRow, column: &str) -> Result<Option<KeyValue>, StorageError> {
        if let Ok(n) = row.try_get::<Option<i64>, _>(0) {
            return Ok(n.map(KeyValue::Integer));
        }
        if let Ok(s) = row.try_get::<Option<String>, _>(0) {
            return Ok(s.map(KeyValue::Text));
        }
        match row.try_get::<Option<Vec<u8>>, _>(0) {
            Ok(bytes) => bytes
                .map(|b| {
                    String::from_utf8(b).map(KeyValue::Text).map_err(|e| StorageError::Decode {
                        column: column.to_string(),
                        reason: e.to_string(),
                    })
                })
                .transpose(),
            Err(e) => Err(StorageError::Decode {
                column: column.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl RelationExecutor for SqlExecutor {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn pluck(
        &self,
        relation: &Relation,
        column: &str,
    ) -> Result<Vec<Option<KeyValue>>, StorageError> {
        let query = relation.to_sql(self.dialect, column);
        let started = Instant::now();

        let rows = Self::bind_all(&query.sql, &query.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        metrics::record_pluck(relation.table(), rows.len(), started.elapsed());
        debug!(table = relation.table(), column, rows = rows.len(), "plucked");

        rows.iter().map(|row| Self::decode_key(row, column)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::Fragment;

    async fn memory_executor() -> SqlExecutor {
        let config = QueryEngineConfig {
            database_url: Some("sqlite::memory:".to_string()),
            max_connections: 1,
            ..Default::default()
        };
        let executor = SqlExecutor::connect(&config).await.unwrap();
        sqlx::query("CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT, slug TEXT)")
            .execute(executor.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO posts (id, title, slug) VALUES (1, 'alpha', 'a'), (2, 'beta', NULL), (3, 'gamma', 'g')")
            .execute(executor.pool())
            .await
            .unwrap();
        executor
    }

    #[tokio::test]
    async fn test_connect_detects_sqlite() {
        let executor = memory_executor().await;
        assert_eq!(executor.dialect(), Dialect::Sqlite);
    }

    #[tokio::test]
    async fn test_connect_without_url_fails() {
        let result = SqlExecutor::connect(&QueryEngineConfig::default()).await;
        assert!(matches!(result, Err(StorageError::Backend(_))));
    }

    #[tokio::test]
    async fn test_pluck_integer_keys_in_order() {
        let executor = memory_executor().await;
        let relation = Relation::new("posts", "Post").order("posts.id DESC");
        let keys = executor.pluck(&relation, "posts.id").await.unwrap();
        assert_eq!(
            keys,
            vec![
                Some(KeyValue::Integer(3)),
                Some(KeyValue::Integer(2)),
                Some(KeyValue::Integer(1))
            ]
        );
    }

    #[tokio::test]
    async fn test_pluck_text_with_nulls() {
        let executor = memory_executor().await;
        let relation = Relation::new("posts", "Post").order("posts.id ASC");
        let keys = executor.pluck(&relation, "posts.slug").await.unwrap();
        assert_eq!(keys, vec![Some(KeyValue::from("a")), None, Some(KeyValue::from("g"))]);
    }

    #[tokio::test]
    async fn test_pluck_binds_params() {
        let executor = memory_executor().await;
        let relation = Relation::new("posts", "Post")
            .filter(Fragment::with_params("posts.title = ?", vec![SqlParam::Text("beta".into())]));
        let keys = executor.pluck(&relation, "posts.id").await.unwrap();
        assert_eq!(keys, vec![Some(KeyValue::Integer(2))]);
    }

    #[tokio::test]
    async fn test_with_rollback_undoes_writes() {
        let executor = memory_executor().await;

        let deleted: Result<u64, StorageError> = with_rollback(executor.pool(), |conn| {
            Box::pin(async move {
                let done = sqlx::query("DELETE FROM posts WHERE id = 1")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                Ok::<u64, StorageError>(done.rows_affected())
            })
        })
        .await;
        assert_eq!(deleted.unwrap(), 1);

        let keys = executor
            .pluck(&Relation::new("posts", "Post").filter("posts.id = 1"), "posts.id")
            .await
            .unwrap();
        assert_eq!(keys, vec![Some(KeyValue::Integer(1))]);
    }

    #[tokio::test]
    async fn test_with_rollback_undoes_writes_on_error() {
        let executor = memory_executor().await;

        let result: Result<(), StorageError> = with_rollback(executor.pool(), |conn| {
            Box::pin(async move {
                sqlx::query("DELETE FROM posts")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                Err::<(), StorageError>(StorageError::Backend("boom".to_string()))
            })
        })
        .await;
        assert!(result.is_err());

        let keys = executor
            .pluck(&Relation::new("posts", "Post"), "posts.id")
            .await
            .unwrap();
        assert_eq!(keys.len(), 3);
    }
}
