// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Process-wide, read-only metadata cache.
//!
//! Entities are resolved lazily on first use and kept for the life of the
//! cache. Nothing is ever invalidated: metadata is assumed immutable for the
//! process lifetime. Tests build a fresh cache per case.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::catalog::{AssociationCatalog, AssociationTarget};
use super::{ColumnType, EntityMetadata, EntityMetadataProvider};
use crate::error::QueryError;
use crate::naming::{EntityReference, NameResolver};
use crate::relation::Relation;

/// Columns tried, in order, when an entity declares no default sort.
const SORT_CANDIDATES: [&str; 8] = [
    "name",
    "title",
    "label",
    "subject",
    "full_name",
    "first_name",
    "email",
    "description",
];

/// A resolved entity: identity, metadata and association catalog.
pub struct Entity {
    reference: EntityReference,
    metadata: EntityMetadata,
    table: String,
    catalog: AssociationCatalog,
    provider: Arc<dyn EntityMetadataProvider>,
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("reference", &self.reference)
            .field("table", &self.table)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

impl Entity {
    #[must_use]
    pub fn reference(&self) -> &EntityReference {
        &self.reference
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.reference.type_name
    }

    #[must_use]
    pub fn metadata(&self) -> &EntityMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn catalog(&self) -> &AssociationCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.metadata.primary_key
    }

    /// `table.column`
    #[must_use]
    pub fn qualified(&self, column: &str) -> String {
        format!("{}.{column}", self.table)
    }

    #[must_use]
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.metadata.column_type(name)
    }

    /// Qualified SQL expression for `field`.
    ///
    /// Direct references map to their foreign key. Polymorphic references map
    /// to the bare association name; callers append `_id`/`_type`.
    #[must_use]
    pub fn sql_column(&self, field: &str) -> String {
        if field.contains('.') || field.contains('(') {
            return field.to_string();
        }
        if field == "id" || field == self.primary_key() {
            return self.qualified(self.primary_key());
        }
        if self.metadata.columns.contains_key(field) {
            return self.qualified(field);
        }
        if let Some(association) = self.catalog.find(field) {
            return self.qualified(&association.foreign_key);
        }
        self.qualified(field)
    }

    /// Column other entities sort by when they order by a reference to this one.
    #[must_use]
    pub fn default_sort_column(&self) -> String {
        if let Some(column) = &self.metadata.default_sort {
            return column.clone();
        }
        SORT_CANDIDATES
            .iter()
            .find(|candidate| self.metadata.columns.contains_key(**candidate))
            .map_or_else(|| self.primary_key().to_string(), |c| (*c).to_string())
    }

    /// Configured search columns, else every textual column.
    #[must_use]
    pub fn search_columns(&self) -> Vec<String> {
        if let Some(columns) = &self.metadata.search_columns {
            return columns.clone();
        }
        self.metadata
            .columns
            .iter()
            .filter(|(_, t)| matches!(t, ColumnType::String | ColumnType::Text | ColumnType::Email))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Every row of this entity.
    #[must_use]
    pub fn relation(&self) -> Relation {
        Relation::new(&self.table, &self.reference.type_name)
    }

    #[must_use]
    pub fn deobfuscate(&self, token: &str) -> Option<i64> {
        self.provider.deobfuscate(self.type_name(), token)
    }
}

pub struct MetadataCache {
    provider: Arc<dyn EntityMetadataProvider>,
    names: NameResolver,
    entities: DashMap<String, Arc<Entity>>,
}

impl MetadataCache {
    #[must_use]
    pub fn new(provider: Arc<dyn EntityMetadataProvider>) -> Self {
        Self {
            provider,
            names: NameResolver::new(),
            entities: DashMap::new(),
        }
    }

    pub fn reference(&self, identifier: &str) -> Result<EntityReference, QueryError> {
        self.names.resolve(identifier)
    }

    /// Resolve `identifier` and load its entity, building it on first use.
    pub fn entity(&self, identifier: &str) -> Result<Arc<Entity>, QueryError> {
        let reference = self.names.resolve(identifier)?;
        if let Some(found) = self.entities.get(&reference.type_name) {
            return Ok(Arc::clone(found.value()));
        }

        let metadata = self
            .provider
            .entity(&reference.type_name)
            .ok_or_else(|| QueryError::UnknownEntity(reference.type_name.clone()))?;

        // Built outside the map; concurrent builders race and the first insert wins.
        let table = metadata.table_for(&reference);
        let catalog = AssociationCatalog::build(&reference, &metadata, self, Arc::clone(&self.provider));
        debug!(entity = %reference, table = %table, associations = catalog.all().len(), "entity cached");

        let entity = Arc::new(Entity {
            reference: reference.clone(),
            metadata,
            table,
            catalog,
            provider: Arc::clone(&self.provider),
        });

        Ok(Arc::clone(
            self.entities
                .entry(reference.type_name)
                .or_insert(entity)
                .value(),
        ))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub(crate) fn metadata_for(&self, type_name: &str) -> Option<(EntityReference, EntityMetadata)> {
        let reference = self.names.resolve(type_name).ok()?;
        let metadata = self.provider.entity(&reference.type_name)?;
        Some((reference, metadata))
    }

    /// Target of an association declared on `owner`.
    ///
    /// Tries `class_name` (or `fallback`) at the top level, then inside the
    /// owner's namespace. Unknown targets get conventional table and key.
    pub(crate) fn target_for(
        &self,
        owner: &EntityReference,
        class_name: Option<&str>,
        fallback: &str,
    ) -> AssociationTarget {
        let name = class_name.unwrap_or(fallback);

        let mut candidates = vec![name.to_string()];
        if !owner.namespaces.is_empty() && !name.contains("::") {
            let parent = owner.type_name.rsplit_once("::").map_or("", |(ns, _)| ns);
            candidates.push(format!("{parent}::{name}"));
        }

        for candidate in &candidates {
            if let Some((reference, metadata)) = self.metadata_for(candidate) {
                return AssociationTarget {
                    table: metadata.table_for(&reference),
                    primary_key: metadata.primary_key,
                    reference,
                };
            }
        }

        let reference = self.names.resolve(name).unwrap_or_else(|_| owner.clone());
        debug!(owner = %owner, target = %reference, "no metadata for association target, using conventions");
        AssociationTarget {
            table: reference.table_name(),
            primary_key: "id".to_string(),
            reference,
        }
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("entities", &self.entities.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{AssociationDefinition, StaticMetadataProvider};

    fn cache() -> MetadataCache {
        let provider = StaticMetadataProvider::new()
            .with_entity(
                EntityMetadata::new("Admin::Post")
                    .column("title", ColumnType::String)
                    .column("body", ColumnType::Text)
                    .column("views", ColumnType::Integer)
                    .association(AssociationDefinition::belongs_to("author")),
            )
            .with_entity(EntityMetadata::new("Admin::Author").table("people").primary_key("person_id"))
            .with_entity(EntityMetadata::new("Ticket").column("code", ColumnType::Integer));
        MetadataCache::new(Arc::new(provider))
    }

    #[test]
    fn test_entity_is_cached_under_canonical_name() {
        let cache = cache();
        let a = cache.entity("admin/posts").unwrap();
        let b = cache.entity("Admin::Post").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert_eq!(a.table(), "admin_posts");
    }

    #[test]
    fn test_unknown_entity() {
        let cache = cache();
        assert!(matches!(cache.entity("Comment"), Err(QueryError::UnknownEntity(t)) if t == "Comment"));
    }

    #[test]
    fn test_target_resolves_in_owner_namespace() {
        let cache = cache();
        let post = cache.entity("Admin::Post").unwrap();
        let author = post.catalog().find("author").unwrap();
        let target = author.target.as_ref().unwrap();
        assert_eq!(target.reference.type_name, "Admin::Author");
        assert_eq!(target.table, "people");
        assert_eq!(target.primary_key, "person_id");
    }

    #[test]
    fn test_sql_column() {
        let cache = cache();
        let post = cache.entity("Admin::Post").unwrap();
        assert_eq!(post.sql_column("title"), "admin_posts.title");
        assert_eq!(post.sql_column("id"), "admin_posts.id");
        assert_eq!(post.sql_column("author"), "admin_posts.author_id");
        assert_eq!(post.sql_column("author_id"), "admin_posts.author_id");
        assert_eq!(post.sql_column("COUNT(comments.id)"), "COUNT(comments.id)");
    }

    #[test]
    fn test_default_sort_and_search_columns() {
        let cache = cache();
        let post = cache.entity("Admin::Post").unwrap();
        assert_eq!(post.default_sort_column(), "title");
        assert_eq!(post.search_columns(), vec!["title".to_string(), "body".to_string()]);

        let ticket = cache.entity("Ticket").unwrap();
        assert_eq!(ticket.default_sort_column(), "id");
        assert!(ticket.search_columns().is_empty());
    }
}
