//! Integration tests against a real SQLite database.
//!
//! Every test gets its own in-memory database behind a single-connection
//! pool, so no external services are needed.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//! - `search_*` - Filters on scalar columns and across associations
//! - `order_*` - Orderings, including rank orderings through associations
//! - `scope_*` - Scope probing inside the rollback sandbox

use std::sync::{Arc, Once};

use async_trait::async_trait;
use serde_json::json;
use sqlx::{AnyConnection, AnyPool};

use query_engine::metadata::{EntityMember, MemberOutput};
use query_engine::{
    AssociationDefinition, ColumnType, Direction, EntityMetadata, MetadataCache, OrderOptions,
    QueryEngine, QueryEngineConfig, Relation, RelationExecutor, SearchOptions, SqlExecutor,
    StaticMetadataProvider, StorageError,
};
use query_engine::relation::KeyValue;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

// =============================================================================
// Fixtures
// =============================================================================

const SCHEMA: &[&str] = &[
    "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, email TEXT)",
    "CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT, rating REAL, published_on TEXT, author_id INTEGER)",
    "CREATE TABLE comments (id INTEGER PRIMARY KEY, body TEXT, post_id INTEGER)",
    "CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT)",
    "CREATE TABLE posts_tags (post_id INTEGER, tag_id INTEGER)",
];

const ROWS: &[&str] = &[
    "INSERT INTO users (id, name, email) VALUES (1, 'Zed', 'zed@example.com'), (2, 'Ada', 'ada@example.com')",
    "INSERT INTO posts (id, title, rating, published_on, author_id) VALUES \
        (1, 'Ownership', 10.0, '2024-02-10', 1), \
        (2, 'Borrowing', 10.5, '2023-12-31', 2), \
        (3, 'Lifetimes', 11.0, '2024-07-01', NULL)",
    "INSERT INTO comments (id, body, post_id) VALUES (1, 'great read', 3), (2, 'meh', 1)",
    "INSERT INTO tags (id, name) VALUES (1, 'rust'), (2, 'async')",
    "INSERT INTO posts_tags (post_id, tag_id) VALUES (1, 1), (2, 1), (3, 2)",
];

fn provider() -> StaticMetadataProvider {
    StaticMetadataProvider::new()
        .with_entity(
            EntityMetadata::new("Post")
                .column("title", ColumnType::String)
                .column("rating", ColumnType::Decimal)
                .column("published_on", ColumnType::Date)
                .association(AssociationDefinition::belongs_to("author").class_name("User"))
                .association(AssociationDefinition::has_many("comments"))
                .association(AssociationDefinition::has_and_belongs_to_many("tags")),
        )
        .with_entity(
            EntityMetadata::new("User")
                .column("name", ColumnType::String)
                .column("email", ColumnType::Email),
        )
        .with_entity(
            EntityMetadata::new("Comment")
                .column("body", ColumnType::Text)
                .association(AssociationDefinition::belongs_to("post")),
        )
        .with_entity(EntityMetadata::new("Tag").column("name", ColumnType::String))
}

struct Fixture {
    engine: QueryEngine,
    executor: Arc<SqlExecutor>,
    pool: AnyPool,
}

async fn setup_with(provider: StaticMetadataProvider) -> Fixture {
    init_tracing();

    let config = QueryEngineConfig {
        database_url: Some("sqlite::memory:".into()),
        max_connections: 1,
        ..Default::default()
    };
    let executor = Arc::new(SqlExecutor::connect(&config).await.expect("connect to sqlite"));
    let pool = executor.pool().clone();

    for statement in SCHEMA.iter().chain(ROWS) {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .unwrap_or_else(|e| panic!("{statement}: {e}"));
    }

    let cache = Arc::new(MetadataCache::new(Arc::new(provider)));
    let engine = QueryEngine::with_config(cache, executor.clone(), &config);
    Fixture { engine, executor, pool }
}

async fn setup() -> Fixture {
    setup_with(provider()).await
}

async fn post_ids(fixture: &Fixture, relation: &Relation) -> Vec<i64> {
    fixture
        .executor
        .pluck(relation, "posts.id")
        .await
        .expect("pluck posts")
        .into_iter()
        .map(|key| match key {
            Some(KeyValue::Integer(id)) => id,
            other => panic!("unexpected key {other:?}"),
        })
        .collect()
}

async fn search(fixture: &Fixture, field: &str, value: serde_json::Value) -> Vec<i64> {
    let relation = fixture
        .engine
        .compiler("posts")
        .unwrap()
        .search(field, value, &SearchOptions::default())
        .await
        .unwrap();
    let relation = fixture
        .engine
        .compiler("posts")
        .unwrap()
        .bind(relation)
        .order("id", Direction::Asc, &OrderOptions::default())
        .await
        .unwrap();
    post_ids(fixture, &relation).await
}

// =============================================================================
// Search
// =============================================================================

#[tokio::test]
async fn search_date_matches_whole_year() {
    let fixture = setup().await;
    assert_eq!(search(&fixture, "published_on", json!("2024")).await, vec![1, 3]);
    assert_eq!(search(&fixture, "published_on", json!("2023-12")).await, vec![2]);
}

#[tokio::test]
async fn search_whole_decimal_is_widened_but_exact_decimal_is_not() {
    let fixture = setup().await;
    assert_eq!(search(&fixture, "rating", json!("10")).await, vec![1, 2]);
    assert_eq!(search(&fixture, "rating", json!("10.00")).await, vec![1]);
}

#[tokio::test]
async fn search_text_is_substring_match() {
    let fixture = setup().await;
    assert_eq!(search(&fixture, "title", json!("wing")).await, vec![2]);
}

#[tokio::test]
async fn search_any_by_primary_keys() {
    let fixture = setup().await;
    let relation = fixture
        .engine
        .compiler("posts")
        .unwrap()
        .search_any(json!([1, 2, 3]), &Default::default())
        .unwrap();
    let mut ids = post_ids(&fixture, &relation).await;
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn search_through_direct_reference() {
    let fixture = setup().await;
    assert_eq!(search(&fixture, "author", json!("ada")).await, vec![2]);
}

#[tokio::test]
async fn search_with_no_related_match_returns_nothing() {
    let fixture = setup().await;
    assert!(search(&fixture, "author", json!("nobody")).await.is_empty());
    assert!(search(&fixture, "tags", json!("cobol")).await.is_empty());
}

#[tokio::test]
async fn search_reversed_many_and_many_to_many() {
    let fixture = setup().await;
    assert_eq!(search(&fixture, "comments", json!("great")).await, vec![3]);
    assert_eq!(search(&fixture, "tags", json!("rust")).await, vec![1, 2]);
}

#[tokio::test]
async fn search_null_reference() {
    let fixture = setup().await;
    assert_eq!(search(&fixture, "author", json!(null)).await, vec![3]);
}

// =============================================================================
// Order
// =============================================================================

#[tokio::test]
async fn order_by_direct_reference_puts_missing_first_then_target_order() {
    let fixture = setup().await;
    let relation = fixture
        .engine
        .compiler("posts")
        .unwrap()
        .order("author", Direction::Asc, &OrderOptions::default())
        .await
        .unwrap();
    // Post 3 has no author; Ada (post 2) sorts before Zed (post 1).
    assert_eq!(post_ids(&fixture, &relation).await, vec![3, 2, 1]);
}

#[tokio::test]
async fn order_by_text_column() {
    let fixture = setup().await;
    let relation = fixture
        .engine
        .compiler("posts")
        .unwrap()
        .order("title", Direction::Desc, &OrderOptions::default())
        .await
        .unwrap();
    assert_eq!(post_ids(&fixture, &relation).await, vec![1, 3, 2]);
}

// =============================================================================
// Scope probing
// =============================================================================

/// Deletes a post, then reports itself as a scope.
struct DestructiveScope;

#[async_trait]
impl EntityMember for DestructiveScope {
    async fn invoke(&self, conn: &mut AnyConnection) -> Result<MemberOutput, StorageError> {
        sqlx::query("DELETE FROM posts WHERE id = 1")
            .execute(&mut *conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(MemberOutput::Relation(Relation::new("posts", "Post")))
    }
}

struct PlainValue;

#[async_trait]
impl EntityMember for PlainValue {
    async fn invoke(&self, _conn: &mut AnyConnection) -> Result<MemberOutput, StorageError> {
        Ok(MemberOutput::Value(json!(42)))
    }
}

/// Deletes a post, then fails.
struct FailingScope;

#[async_trait]
impl EntityMember for FailingScope {
    async fn invoke(&self, conn: &mut AnyConnection) -> Result<MemberOutput, StorageError> {
        sqlx::query("DELETE FROM posts WHERE id = 2")
            .execute(&mut *conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Err(StorageError::Backend("scope blew up".into()))
    }
}

#[tokio::test]
async fn scope_probe_rolls_back_side_effects() {
    let provider = provider()
        .with_member("Post", "recent", Arc::new(DestructiveScope))
        .with_member("Post", "answer", Arc::new(PlainValue));
    let fixture = setup_with(provider).await;
    let post = fixture.engine.cache().entity("Post").unwrap();

    assert!(post.catalog().is_scope("recent", &fixture.pool).await);
    assert!(!post.catalog().is_scope("answer", &fixture.pool).await);
    assert!(!post.catalog().is_scope("missing", &fixture.pool).await);

    let all = fixture.engine.compiler("posts").unwrap().relation().cloned().unwrap();
    let mut ids = post_ids(&fixture, &all).await;
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn scope_probe_failure_is_not_a_scope_and_rolls_back() {
    let provider = provider().with_member("Post", "broken", Arc::new(FailingScope));
    let fixture = setup_with(provider).await;
    let post = fixture.engine.cache().entity("Post").unwrap();

    assert!(!post.catalog().is_scope("broken", &fixture.pool).await);

    let all = fixture.engine.compiler("posts").unwrap().relation().cloned().unwrap();
    let mut ids = post_ids(&fixture, &all).await;
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3]);
}
