// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Key translation across associations.
//!
//! A sub-relation over a related entity is reduced to plucked keys, and
//! those keys are carried back to a column of the owning entity. In
//! [`Mode::Rank`] the plucks keep the sub-relation's ordering so the keys
//! can become a rank ordering; in [`Mode::Filter`] only membership matters.

use serde_json::Value;
use tracing::debug;

use super::{OrderOptions, QueryCompiler, SearchAnyOptions};
use crate::error::QueryError;
use crate::metadata::catalog::{AddressScope, AssociationDescriptor, AssociationKind, AssociationTarget};
use crate::relation::{Direction, Fragment, KeySet, Relation, SqlParam};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Mode {
    Filter,
    Rank,
}

impl QueryCompiler<'_> {
    fn cap(&self, limit: Option<usize>) -> usize {
        let cap = self.engine.key_translation_limit;
        limit.map_or(cap, |limit| limit.min(cap))
    }

    fn unsupported(association: &AssociationDescriptor, reason: &str) -> QueryError {
        QueryError::UnsupportedAssociation {
            name: association.name.clone(),
            reason: reason.to_string(),
        }
    }

    fn target_of(association: &AssociationDescriptor) -> Result<&AssociationTarget, QueryError> {
        association
            .target
            .as_ref()
            .ok_or_else(|| Self::unsupported(association, "target type varies per row"))
    }

    async fn pluck(&self, relation: &Relation, column: &str) -> Result<KeySet, QueryError> {
        let rows = self.engine.executor.pluck(relation, column).await?;
        let keys = KeySet::from_plucked(rows);
        debug!(table = relation.table(), column, keys = keys.len(), "translated keys");
        Ok(keys)
    }

    /// Restrict `relation` to rows whose `column` is in `values`, ranked by
    /// their position in `values` when ranking.
    fn narrow(&self, relation: Relation, column: &str, values: &KeySet, mode: Mode) -> Relation {
        let relation = relation.filter(values.in_list(column));
        match mode {
            Mode::Filter => relation,
            Mode::Rank => relation
                .order_opt(values.rank_order(column))
                .limit(self.cap(None)),
        }
    }

    /// Pluck `pluck_column` from rows of `relation` whose `match_column` is
    /// in `values`. No query is issued for an empty `values`.
    async fn follow(
        &self,
        relation: Relation,
        match_column: &str,
        values: &KeySet,
        mode: Mode,
        pluck_column: &str,
    ) -> Result<KeySet, QueryError> {
        if values.is_empty() {
            return Ok(KeySet::new());
        }
        let relation = self.narrow(relation, match_column, values, mode);
        self.pluck(&relation, pluck_column).await
    }

    /// Fix the discriminator type on the target side of `association`.
    fn constrain_target(association: &AssociationDescriptor, relation: Relation) -> Relation {
        let (Some(target), Some(discriminator)) = (&association.target, association.kind.discriminator()) else {
            return relation;
        };
        match &discriminator.type_value {
            Some(type_value) => relation.filter(Fragment::with_params(
                format!("{} = ?", target.qualified(&discriminator.type_column)),
                vec![SqlParam::Text(type_value.clone())],
            )),
            None => relation,
        }
    }

    /// Rows of this entity whose `association` matches `value` in the
    /// related entity's search columns, as an `IN` condition.
    pub(super) async fn filter_by_association(
        &self,
        association: &AssociationDescriptor,
        value: &Value,
        fuzzy: bool,
    ) -> Result<Fragment, QueryError> {
        let target = Self::target_of(association)?;
        let sub = self.descend(&target.reference.type_name)?;
        let matched = sub.search_any(
            value.clone(),
            &SearchAnyOptions {
                columns: None,
                fuzzy,
            },
        )?;
        let matched = Self::constrain_target(association, matched);

        let (column, keys) = self.correlate(association, matched, Mode::Filter).await?;
        Ok(keys.in_list(&column))
    }

    /// Rank ordering of this entity by the related entity's own ordering.
    pub(super) async fn rank_by_association(
        &self,
        association: &AssociationDescriptor,
        direction: Direction,
        options: &OrderOptions,
    ) -> Result<Option<Fragment>, QueryError> {
        let target = Self::target_of(association)?;
        let sub = self.descend(&target.reference.type_name)?;
        let sort = options
            .sort_field
            .clone()
            .unwrap_or_else(|| sub.entity().default_sort_column());

        let nested = OrderOptions {
            limit: options.limit,
            reorder: true,
            ..OrderOptions::default()
        };
        let ordered = sub
            .order_nested(&sort, direction, &nested)
            .await?
            .limit(self.cap(options.limit));
        let ordered = Self::constrain_target(association, ordered);

        let (column, keys) = self.correlate(association, ordered, Mode::Rank).await?;
        Ok(keys.rank_order(&column))
    }

    /// `IN` condition for rows whose `<category>_address` matches `value`.
    pub(super) async fn filter_by_addresses(
        &self,
        field: &str,
        value: &Value,
        fuzzy: bool,
    ) -> Result<Fragment, QueryError> {
        let scope = self.address_scope(field)?;
        let target = Self::target_of(&scope.association)?;
        let sub = self
            .descend(&target.reference.type_name)?
            .bind(scope.relation.clone());

        let matched = sub.search_any(
            value.clone(),
            &SearchAnyOptions {
                columns: None,
                fuzzy,
            },
        )?;
        let keys = self
            .pluck(&matched, &target.qualified(&scope.association.foreign_key))
            .await?;
        Ok(keys.in_list(&self.own_key()))
    }

    /// Rank ordering by the `<category>_address` sub-relation's default sort.
    pub(super) async fn rank_by_addresses(
        &self,
        field: &str,
        direction: Direction,
        options: &OrderOptions,
    ) -> Result<Option<Fragment>, QueryError> {
        let scope = self.address_scope(field)?;
        let target = Self::target_of(&scope.association)?;
        let sub = self
            .descend(&target.reference.type_name)?
            .bind(scope.relation.clone());
        let sort = options
            .sort_field
            .clone()
            .unwrap_or_else(|| sub.entity().default_sort_column());

        let nested = OrderOptions {
            limit: options.limit,
            reorder: true,
            ..OrderOptions::default()
        };
        let ordered = sub
            .order_nested(&sort, direction, &nested)
            .await?
            .limit(self.cap(options.limit));
        let keys = self
            .pluck(&ordered, &target.qualified(&scope.association.foreign_key))
            .await?;
        Ok(keys.rank_order(&self.own_key()))
    }

    fn address_scope(&self, field: &str) -> Result<AddressScope, QueryError> {
        self.entity
            .catalog()
            .find_address_association(field)
            .ok_or_else(|| QueryError::UnknownAssociation {
                owner: self.entity.type_name().to_string(),
                name: field.to_string(),
            })
    }

    /// Carry the keys of `matched` (a relation over the association's
    /// target) back to this entity. Returns the column of this entity to
    /// compare against and the keys to compare with.
    pub(super) async fn correlate(
        &self,
        association: &AssociationDescriptor,
        matched: Relation,
        mode: Mode,
    ) -> Result<(String, KeySet), QueryError> {
        let target = Self::target_of(association)?;

        match &association.kind {
            AssociationKind::DirectReference => {
                let keys = self.pluck(&matched, &target.qualified(&target.primary_key)).await?;
                Ok((self.entity.qualified(&association.foreign_key), keys))
            }
            AssociationKind::ReversedSingle { .. }
            | AssociationKind::ReversedMany { .. }
            | AssociationKind::NestedOwned { .. } => {
                let keys = self.pluck(&matched, &target.qualified(&association.foreign_key)).await?;
                Ok((self.own_key(), keys))
            }
            AssociationKind::ManyToMany {
                join_table,
                association_foreign_key,
            } => {
                let values = self.pluck(&matched, &target.qualified(&target.primary_key)).await?;
                let keys = self
                    .follow(
                        Relation::new(join_table.as_str(), join_table.as_str()),
                        &format!("{join_table}.{association_foreign_key}"),
                        &values,
                        mode,
                        &format!("{join_table}.{}", association.foreign_key),
                    )
                    .await?;
                Ok((self.own_key(), keys))
            }
            AssociationKind::Through { through, source, .. } => {
                let source = source
                    .as_deref()
                    .ok_or_else(|| Self::unsupported(association, "through association has no usable source"))?;
                self.correlate_through(association, through, source, target, matched, mode)
                    .await
            }
            AssociationKind::PolymorphicReference { .. } => {
                Err(Self::unsupported(association, "target type varies per row"))
            }
        }
    }

    /// Two hops: target → intermediate via `source`, then intermediate →
    /// this entity via `through`.
    async fn correlate_through(
        &self,
        association: &AssociationDescriptor,
        through: &AssociationDescriptor,
        source: &AssociationDescriptor,
        target: &AssociationTarget,
        matched: Relation,
        mode: Mode,
    ) -> Result<(String, KeySet), QueryError> {
        let intermediate = Self::target_of(through)?;
        let base = Relation::new(&intermediate.table, &intermediate.reference.type_name);
        let intermediate_key = intermediate.qualified(&intermediate.primary_key);

        let owner_column = match &through.kind {
            AssociationKind::DirectReference => self.entity.qualified(&through.foreign_key),
            AssociationKind::ReversedSingle { .. }
            | AssociationKind::ReversedMany { .. }
            | AssociationKind::NestedOwned { .. }
            | AssociationKind::ManyToMany { .. } => self.own_key(),
            _ => return Err(Self::unsupported(association, "nested through associations")),
        };

        // Intermediate rows reached from the matched target rows.
        let intermediates = match &source.kind {
            AssociationKind::DirectReference | AssociationKind::PolymorphicReference { .. } => {
                let values = self.pluck(&matched, &target.qualified(&target.primary_key)).await?;
                if values.is_empty() {
                    return Ok((owner_column, KeySet::new()));
                }
                let mut relation = base;
                if let Some(discriminator) = source.kind.discriminator() {
                    relation = relation.filter(Fragment::with_params(
                        format!("{} = ?", intermediate.qualified(&discriminator.type_column)),
                        vec![SqlParam::Text(target.reference.type_name.clone())],
                    ));
                }
                self.narrow(relation, &intermediate.qualified(&source.foreign_key), &values, mode)
            }
            AssociationKind::ReversedSingle { .. }
            | AssociationKind::ReversedMany { .. }
            | AssociationKind::NestedOwned { .. } => {
                let matched = match source.kind.discriminator() {
                    Some(discriminator) => matched.filter(Fragment::with_params(
                        format!("{} = ?", target.qualified(&discriminator.type_column)),
                        vec![SqlParam::Text(intermediate.reference.type_name.clone())],
                    )),
                    None => matched,
                };
                let values = self.pluck(&matched, &target.qualified(&source.foreign_key)).await?;
                if values.is_empty() {
                    return Ok((owner_column, KeySet::new()));
                }
                self.narrow(base, &intermediate_key, &values, mode)
            }
            AssociationKind::ManyToMany {
                join_table,
                association_foreign_key,
            } => {
                let values = self.pluck(&matched, &target.qualified(&target.primary_key)).await?;
                let ids = self
                    .follow(
                        Relation::new(join_table.as_str(), join_table.as_str()),
                        &format!("{join_table}.{association_foreign_key}"),
                        &values,
                        mode,
                        &format!("{join_table}.{}", source.foreign_key),
                    )
                    .await?;
                if ids.is_empty() {
                    return Ok((owner_column, KeySet::new()));
                }
                self.narrow(base, &intermediate_key, &ids, mode)
            }
            AssociationKind::Through { .. } => {
                return Err(Self::unsupported(association, "nested through associations"));
            }
        };

        let keys = match &through.kind {
            AssociationKind::DirectReference => self.pluck(&intermediates, &intermediate_key).await?,
            AssociationKind::ManyToMany {
                join_table,
                association_foreign_key,
            } => {
                let ids = self.pluck(&intermediates, &intermediate_key).await?;
                self.follow(
                    Relation::new(join_table.as_str(), join_table.as_str()),
                    &format!("{join_table}.{association_foreign_key}"),
                    &ids,
                    mode,
                    &format!("{join_table}.{}", through.foreign_key),
                )
                .await?
            }
            _ => {
                let intermediates = Self::constrain_target(through, intermediates);
                self.pluck(&intermediates, &intermediate.qualified(&through.foreign_key))
                    .await?
            }
        };

        Ok((owner_column, keys))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::compiler::tests::engine;
    use crate::compiler::{OrderOptions, SearchOptions};
    use crate::relation::{Dialect, Direction};
    use crate::storage::ScriptedExecutor;

    fn scripted() -> Arc<ScriptedExecutor> {
        Arc::new(ScriptedExecutor::new(Dialect::MySql))
    }

    #[tokio::test]
    async fn test_direct_reference_search_plucks_target_keys() {
        let executor = scripted();
        executor.respond_ids("users", &[3, 5]);
        let engine = engine(Arc::clone(&executor));

        let relation = engine
            .compiler("posts")
            .unwrap()
            .search("author", "bob", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(
            executor.queries(),
            vec!["SELECT users.id FROM users WHERE users.name LIKE '%bob%' OR users.email LIKE '%bob%'".to_string()]
        );
        assert_eq!(
            relation.to_sql_inline("posts.id"),
            "SELECT posts.id FROM posts WHERE posts.author_id IN (3, 5)"
        );
    }

    #[tokio::test]
    async fn test_no_matches_filters_to_sentinel() {
        let executor = scripted();
        let engine = engine(Arc::clone(&executor));

        let relation = engine
            .compiler("posts")
            .unwrap()
            .search("author", "nobody", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(
            relation.to_sql_inline("posts.id"),
            "SELECT posts.id FROM posts WHERE posts.author_id IN (0)"
        );
    }

    #[tokio::test]
    async fn test_reversed_many_plucks_foreign_key_once_per_owner() {
        let executor = scripted();
        executor.respond_ids("comments", &[7, 7, 9]);
        let engine = engine(Arc::clone(&executor));

        let relation = engine
            .compiler("posts")
            .unwrap()
            .search("comments", "great", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(
            executor.queries(),
            vec!["SELECT comments.post_id FROM comments WHERE comments.body LIKE '%great%'".to_string()]
        );
        assert_eq!(
            relation.to_sql_inline("posts.id"),
            "SELECT posts.id FROM posts WHERE posts.id IN (7, 9)"
        );
    }

    #[tokio::test]
    async fn test_many_to_many_goes_through_join_table() {
        let executor = scripted();
        executor.respond_ids("tags", &[2]).respond_ids("posts_tags", &[10, 11]);
        let engine = engine(Arc::clone(&executor));

        let relation = engine
            .compiler("posts")
            .unwrap()
            .search("tags", "rust", &SearchOptions::default())
            .await
            .unwrap();

        let queries = executor.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(
            queries[1],
            "SELECT posts_tags.post_id FROM posts_tags WHERE posts_tags.tag_id IN (2)"
        );
        assert_eq!(
            relation.to_sql_inline("posts.id"),
            "SELECT posts.id FROM posts WHERE posts.id IN (10, 11)"
        );
    }

    #[tokio::test]
    async fn test_many_to_many_skips_join_query_without_matches() {
        let executor = scripted();
        let engine = engine(Arc::clone(&executor));

        let relation = engine
            .compiler("posts")
            .unwrap()
            .search("tags", "cobol", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(executor.queries().len(), 1);
        assert_eq!(
            relation.to_sql_inline("posts.id"),
            "SELECT posts.id FROM posts WHERE posts.id IN (0)"
        );
    }

    #[tokio::test]
    async fn test_through_association_hops_via_intermediate() {
        let executor = scripted();
        executor.respond_ids("users", &[4]).respond_ids("comments", &[1]);
        let engine = engine(Arc::clone(&executor));

        let relation = engine
            .compiler("posts")
            .unwrap()
            .search("commenters", "ann", &SearchOptions::default())
            .await
            .unwrap();

        let queries = executor.queries();
        assert_eq!(queries[1], "SELECT comments.post_id FROM comments WHERE comments.user_id IN (4)");
        assert_eq!(
            relation.to_sql_inline("posts.id"),
            "SELECT posts.id FROM posts WHERE posts.id IN (1)"
        );
    }

    #[tokio::test]
    async fn test_address_convention_search() {
        let executor = scripted();
        executor.respond_ids("addresses", &[4]);
        let engine = engine(Arc::clone(&executor));

        let relation = engine
            .compiler("posts")
            .unwrap()
            .search("billing_address", "main st", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(
            executor.queries(),
            vec![
                "SELECT addresses.addressable_id FROM addresses WHERE (addresses.category = 'billing') \
                 AND (addresses.addressable_type = 'Post') \
                 AND (addresses.street LIKE '%main st%' OR addresses.city LIKE '%main st%')"
                    .to_string()
            ]
        );
        assert_eq!(
            relation.to_sql_inline("posts.id"),
            "SELECT posts.id FROM posts WHERE posts.id IN (4)"
        );
    }

    #[tokio::test]
    async fn test_direct_reference_order_ranks_by_target_sort() {
        let executor = scripted();
        executor.respond_ids("users", &[5, 3]);
        let engine = engine(Arc::clone(&executor));

        let relation = engine
            .compiler("posts")
            .unwrap()
            .order("author", Direction::Asc, &OrderOptions::default())
            .await
            .unwrap();

        assert_eq!(
            executor.queries(),
            vec![
                "SELECT users.id FROM users ORDER BY ISNULL(users.name), users.name = '' ASC, \
                 users.name ASC LIMIT 1000"
                    .to_string()
            ]
        );
        assert_eq!(
            relation.to_sql_inline("posts.id"),
            "SELECT posts.id FROM posts ORDER BY posts.author_id IS NULL DESC, \
             posts.author_id = 5 DESC, posts.author_id = 3 DESC"
        );
    }

    #[tokio::test]
    async fn test_reversed_order_honours_limit_and_falls_back_to_own_key() {
        let executor = scripted();
        executor.respond_ids("comments", &[2, 1, 2]);
        let engine = engine(Arc::clone(&executor));

        let options = OrderOptions {
            limit: Some(10),
            ..OrderOptions::default()
        };
        let relation = engine
            .compiler("posts")
            .unwrap()
            .order("comments", Direction::Desc, &options)
            .await
            .unwrap();

        assert_eq!(
            executor.queries(),
            vec!["SELECT comments.post_id FROM comments ORDER BY ISNULL(comments.id), comments.id DESC LIMIT 10".to_string()]
        );
        assert_eq!(
            relation.to_sql_inline("posts.id"),
            "SELECT posts.id FROM posts ORDER BY posts.id = 2 DESC, posts.id = 1 DESC, posts.id DESC"
        );
    }

    #[tokio::test]
    async fn test_many_to_many_order_ranks_join_rows() {
        let executor = scripted();
        executor.respond_ids("tags", &[2, 1]).respond_ids("posts_tags", &[11, 10, 11]);
        let engine = engine(Arc::clone(&executor));

        let relation = engine
            .compiler("posts")
            .unwrap()
            .order("tags", Direction::Asc, &OrderOptions::default())
            .await
            .unwrap();

        assert_eq!(
            executor.queries(),
            vec![
                "SELECT tags.id FROM tags ORDER BY ISNULL(tags.name), tags.name = '' ASC, \
                 tags.name ASC LIMIT 1000"
                    .to_string(),
                "SELECT posts_tags.post_id FROM posts_tags WHERE posts_tags.tag_id IN (2, 1) \
                 ORDER BY posts_tags.tag_id = 2 DESC, posts_tags.tag_id = 1 DESC LIMIT 1000"
                    .to_string(),
            ]
        );
        assert_eq!(
            relation.to_sql_inline("posts.id"),
            "SELECT posts.id FROM posts ORDER BY posts.id = 11 DESC, posts.id = 10 DESC, posts.id ASC"
        );
    }

    #[tokio::test]
    async fn test_through_order_ranks_intermediate_rows() {
        let executor = scripted();
        executor.respond_ids("users", &[4, 6]).respond_ids("comments", &[3, 1]);
        let engine = engine(Arc::clone(&executor));

        let relation = engine
            .compiler("posts")
            .unwrap()
            .order("commenters", Direction::Asc, &OrderOptions::default())
            .await
            .unwrap();

        let queries = executor.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(
            queries[1],
            "SELECT comments.post_id FROM comments WHERE comments.user_id IN (4, 6) \
             ORDER BY comments.user_id = 4 DESC, comments.user_id = 6 DESC LIMIT 1000"
        );
        assert_eq!(
            relation.to_sql_inline("posts.id"),
            "SELECT posts.id FROM posts ORDER BY posts.id = 3 DESC, posts.id = 1 DESC, posts.id ASC"
        );
    }

    #[tokio::test]
    async fn test_address_convention_order() {
        let executor = scripted();
        executor.respond_ids("addresses", &[8, 2]);
        let engine = engine(Arc::clone(&executor));

        let relation = engine
            .compiler("posts")
            .unwrap()
            .order("billing_address", Direction::Asc, &OrderOptions::default())
            .await
            .unwrap();

        assert_eq!(
            executor.queries(),
            vec![
                "SELECT addresses.addressable_id FROM addresses WHERE (addresses.category = 'billing') \
                 AND (addresses.addressable_type = 'Post') \
                 ORDER BY ISNULL(addresses.id), addresses.id ASC LIMIT 1000"
                    .to_string()
            ]
        );
        assert_eq!(
            relation.to_sql_inline("posts.id"),
            "SELECT posts.id FROM posts ORDER BY posts.id = 8 DESC, posts.id = 2 DESC, posts.id ASC"
        );
    }

    #[tokio::test]
    async fn test_empty_rank_keeps_fallback_ordering() {
        let executor = scripted();
        let engine = engine(Arc::clone(&executor));

        let relation = engine
            .compiler("posts")
            .unwrap()
            .order("tags", Direction::Asc, &OrderOptions::default())
            .await
            .unwrap();

        assert_eq!(relation.to_sql_inline("posts.id"), "SELECT posts.id FROM posts ORDER BY posts.id ASC");
    }

    #[tokio::test]
    async fn test_polymorphic_association_cannot_be_translated() {
        let executor = scripted();
        let engine = engine(Arc::clone(&executor));
        let posts = engine.compiler("posts").unwrap();
        let subject = posts.entity().catalog().find_polymorphic("subject").unwrap().clone();

        let err = posts
            .correlate(&subject, posts.entity().relation(), super::Mode::Filter)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::QueryError::UnsupportedAssociation { .. }));
    }
}
