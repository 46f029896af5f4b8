// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entity metadata: what the compiler knows about columns and associations.
//!
//! Metadata comes from an [`EntityMetadataProvider`]. The crate ships a
//! [`StaticMetadataProvider`] that can be loaded from JSON:
//!
//! ```rust
//! use query_engine::metadata::{ColumnType, EntityMetadataProvider, StaticMetadataProvider};
//!
//! let provider = StaticMetadataProvider::from_json(r#"[
//!     {
//!         "type_name": "Post",
//!         "columns": { "title": "string", "author_id": "integer", "published_on": "date" },
//!         "associations": [ { "name": "author", "kind": "belongs_to", "class_name": "User" } ]
//!     },
//!     { "type_name": "User", "columns": { "email": "email" } }
//! ]"#).unwrap();
//!
//! let post = provider.entity("Post").unwrap();
//! assert_eq!(post.column_type("published_on"), Some(ColumnType::Date));
//! assert_eq!(post.associations[0].options.class_name.as_deref(), Some("User"));
//! ```
//!
//! # Caching
//!
//! Providers are queried at most once per entity type; the answers live in a
//! [`MetadataCache`] for the life of the process.

mod cache;
pub mod catalog;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use sqlx::AnyConnection;

use crate::naming::EntityReference;
use crate::relation::Relation;
use crate::storage::StorageError;

pub use cache::{Entity, MetadataCache};

/// Declared storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    #[serde(alias = "varchar", alias = "citext")]
    String,
    Text,
    Email,
    #[serde(alias = "bigint", alias = "smallint")]
    Integer,
    #[serde(alias = "numeric")]
    Decimal,
    #[serde(alias = "double", alias = "real")]
    Float,
    Currency,
    Percentage,
    Duration,
    Price,
    Boolean,
    Date,
    #[serde(alias = "timestamp")]
    Datetime,
    Time,
    Binary,
    Json,
}

/// Association macro as declared by the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationMacro {
    BelongsTo,
    HasOne,
    HasMany,
    HasAndBelongsToMany,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AssociationOptions {
    pub class_name: Option<String>,
    pub foreign_key: Option<String>,
    pub polymorphic: bool,
    /// Polymorphic interface name on the target ("addressable").
    #[serde(rename = "as")]
    pub as_: Option<String>,
    /// Owned children saved with their parent.
    pub autosave: bool,
    pub through: Option<String>,
    pub source: Option<String>,
    pub source_type: Option<String>,
    pub join_table: Option<String>,
    pub association_foreign_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssociationDefinition {
    pub name: String,
    pub kind: AssociationMacro,
    #[serde(flatten)]
    pub options: AssociationOptions,
}

impl AssociationDefinition {
    pub fn new(name: impl Into<String>, kind: AssociationMacro) -> Self {
        Self {
            name: name.into(),
            kind,
            options: AssociationOptions::default(),
        }
    }

    pub fn belongs_to(name: impl Into<String>) -> Self {
        Self::new(name, AssociationMacro::BelongsTo)
    }

    pub fn has_one(name: impl Into<String>) -> Self {
        Self::new(name, AssociationMacro::HasOne)
    }

    pub fn has_many(name: impl Into<String>) -> Self {
        Self::new(name, AssociationMacro::HasMany)
    }

    pub fn has_and_belongs_to_many(name: impl Into<String>) -> Self {
        Self::new(name, AssociationMacro::HasAndBelongsToMany)
    }

    #[must_use]
    pub fn class_name(mut self, class_name: impl Into<String>) -> Self {
        self.options.class_name = Some(class_name.into());
        self
    }

    #[must_use]
    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.options.foreign_key = Some(column.into());
        self
    }

    #[must_use]
    pub fn polymorphic(mut self) -> Self {
        self.options.polymorphic = true;
        self
    }

    #[must_use]
    pub fn as_interface(mut self, interface: impl Into<String>) -> Self {
        self.options.as_ = Some(interface.into());
        self
    }

    #[must_use]
    pub fn autosave(mut self) -> Self {
        self.options.autosave = true;
        self
    }

    #[must_use]
    pub fn through(mut self, through: impl Into<String>) -> Self {
        self.options.through = Some(through.into());
        self
    }

    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.options.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn source_type(mut self, source_type: impl Into<String>) -> Self {
        self.options.source_type = Some(source_type.into());
        self
    }

    #[must_use]
    pub fn join_table(mut self, table: impl Into<String>) -> Self {
        self.options.join_table = Some(table.into());
        self
    }
}

fn default_primary_key() -> String {
    "id".to_string()
}

/// Everything the provider knows about one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EntityMetadata {
    pub type_name: String,
    /// Defaults to the conventional table for `type_name`.
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub columns: IndexMap<String, ColumnType>,
    #[serde(default)]
    pub associations: Vec<AssociationDefinition>,
    /// Column used when another entity sorts by a reference to this one.
    #[serde(default)]
    pub default_sort: Option<String>,
    /// Columns `search_any` matches text against.
    #[serde(default)]
    pub search_columns: Option<Vec<String>>,
    /// Role names in bit order, stored as a bitmask in `roles_mask`.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Primary keys are exposed as opaque tokens.
    #[serde(default)]
    pub obfuscated_ids: bool,
}

impl EntityMetadata {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            table_name: None,
            primary_key: default_primary_key(),
            columns: IndexMap::new(),
            associations: Vec::new(),
            default_sort: None,
            search_columns: None,
            roles: Vec::new(),
            obfuscated_ids: false,
        }
    }

    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }

    #[must_use]
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    #[must_use]
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.insert(name.into(), column_type);
        self
    }

    #[must_use]
    pub fn association(mut self, definition: AssociationDefinition) -> Self {
        self.associations.push(definition);
        self
    }

    #[must_use]
    pub fn default_sort(mut self, column: impl Into<String>) -> Self {
        self.default_sort = Some(column.into());
        self
    }

    #[must_use]
    pub fn search_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn obfuscated_ids(mut self) -> Self {
        self.obfuscated_ids = true;
        self
    }

    #[must_use]
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.get(name).copied()
    }

    /// Configured table, else the conventional one for `reference`.
    #[must_use]
    pub fn table_for(&self, reference: &EntityReference) -> String {
        self.table_name
            .clone()
            .unwrap_or_else(|| reference.table_name())
    }
}

/// What a zero-argument member returned when it was invoked.
#[derive(Debug, Clone)]
pub enum MemberOutput {
    /// The member is a scope: a further-refinable view of rows.
    Relation(Relation),
    Value(serde_json::Value),
}

/// A zero-argument member of an entity type (a named scope or class method).
///
/// Members may write to the store; they are only ever invoked through
/// [`crate::storage::with_rollback`].
#[async_trait]
pub trait EntityMember: Send + Sync {
    async fn invoke(&self, conn: &mut AnyConnection) -> Result<MemberOutput, StorageError>;
}

/// Source of entity metadata. Never mutated by the engine.
pub trait EntityMetadataProvider: Send + Sync {
    /// Metadata for a canonical type name ("Admin::Post").
    fn entity(&self, type_name: &str) -> Option<EntityMetadata>;

    /// Zero-argument member `name` of `type_name`.
    fn member(&self, _type_name: &str, _name: &str) -> Option<Arc<dyn EntityMember>> {
        None
    }

    /// Decode an obfuscated primary key. `None` when `token` is not valid.
    fn deobfuscate(&self, _type_name: &str, _token: &str) -> Option<i64> {
        None
    }
}

type Deobfuscator = Arc<dyn Fn(&str, &str) -> Option<i64> + Send + Sync>;

/// In-process provider, typically deserialised from JSON at startup.
#[derive(Default)]
pub struct StaticMetadataProvider {
    entities: HashMap<String, EntityMetadata>,
    members: HashMap<(String, String), Arc<dyn EntityMember>>,
    deobfuscator: Option<Deobfuscator>,
}

impl StaticMetadataProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of [`EntityMetadata`].
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let entities: Vec<EntityMetadata> = serde_json::from_str(json)?;
        Ok(entities
            .into_iter()
            .fold(Self::new(), |provider, metadata| provider.with_entity(metadata)))
    }

    /// Register `metadata` under its canonical type name.
    #[must_use]
    pub fn with_entity(mut self, metadata: EntityMetadata) -> Self {
        let key = canonical(&metadata.type_name);
        self.entities.insert(key, metadata);
        self
    }

    #[must_use]
    pub fn with_member(
        mut self,
        type_name: &str,
        name: impl Into<String>,
        member: Arc<dyn EntityMember>,
    ) -> Self {
        self.members.insert((canonical(type_name), name.into()), member);
        self
    }

    #[must_use]
    pub fn with_deobfuscator<F>(mut self, deobfuscate: F) -> Self
    where
        F: Fn(&str, &str) -> Option<i64> + Send + Sync + 'static,
    {
        self.deobfuscator = Some(Arc::new(deobfuscate));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl std::fmt::Debug for StaticMetadataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticMetadataProvider")
            .field("entities", &self.entities.keys().collect::<Vec<_>>())
            .field("members", &self.members.len())
            .field("deobfuscator", &self.deobfuscator.is_some())
            .finish()
    }
}

fn canonical(type_name: &str) -> String {
    EntityReference::parse(type_name)
        .map(|r| r.type_name)
        .unwrap_or_else(|_| type_name.to_string())
}

impl EntityMetadataProvider for StaticMetadataProvider {
    fn entity(&self, type_name: &str) -> Option<EntityMetadata> {
        self.entities.get(type_name).cloned()
    }

    fn member(&self, type_name: &str, name: &str) -> Option<Arc<dyn EntityMember>> {
        self.members
            .get(&(type_name.to_string(), name.to_string()))
            .cloned()
    }

    fn deobfuscate(&self, type_name: &str, token: &str) -> Option<i64> {
        self.deobfuscator.as_ref().and_then(|f| f(type_name, token))
    }
}
