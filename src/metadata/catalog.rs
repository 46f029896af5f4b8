// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Association catalog: an entity's relationships, classified by how keys
//! correlate across them.
//!
//! | kind                 | declared as                     | key lives on        |
//! |----------------------|---------------------------------|---------------------|
//! | direct reference     | `belongs_to`                    | owner               |
//! | polymorphic reference| `belongs_to polymorphic`        | owner (`_id`,`_type`)|
//! | reversed single      | `has_one`                       | target              |
//! | reversed many        | `has_many`                      | target              |
//! | nested owned         | `has_many autosave`             | target              |
//! | many to many         | `has_and_belongs_to_many`       | join table          |
//! | through              | `has_many/has_one through:`     | intermediate        |
//!
//! Descriptors are computed once, when the owning entity first enters the
//! [`MetadataCache`](super::MetadataCache), and never change afterwards.

use std::sync::Arc;

use sqlx::AnyPool;
use tracing::{debug, warn};

use super::{AssociationDefinition, AssociationMacro, EntityMetadata, EntityMetadataProvider, MemberOutput};
use crate::metadata::cache::MetadataCache;
use crate::metrics;
use crate::naming::{camelize, classify, pluralize, singularize, EntityReference};
use crate::relation::{Fragment, Relation, SqlParam};
use crate::storage::with_rollback;

/// Name of the reversed-many association the address convention hangs off.
pub const ADDRESSES: &str = "addresses";

/// Base type name the `addresses` association must target.
pub const ADDRESS_TYPE: &str = "Address";

const ADDRESS_SUFFIXES: [&str; 2] = ["_addresses", "_address"];

/// Polymorphic type/id column pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discriminator {
    pub type_column: String,
    pub id_column: String,
    /// Type name the `type_column` must hold, when fixed by the association.
    pub type_value: Option<String>,
}

/// Entity on the far side of an association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationTarget {
    pub reference: EntityReference,
    pub table: String,
    pub primary_key: String,
}

impl AssociationTarget {
    #[must_use]
    pub fn qualified(&self, column: &str) -> String {
        format!("{}.{column}", self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationKind {
    DirectReference,
    PolymorphicReference {
        discriminator: Discriminator,
    },
    ReversedSingle {
        discriminator: Option<Discriminator>,
    },
    ReversedMany {
        discriminator: Option<Discriminator>,
    },
    NestedOwned {
        discriminator: Option<Discriminator>,
    },
    ManyToMany {
        join_table: String,
        /// Join table column pointing at the target.
        association_foreign_key: String,
    },
    Through {
        /// Owner's association to the intermediate entity.
        through: Box<AssociationDescriptor>,
        /// Intermediate's association to the target. `None` when it cannot be
        /// resolved or is itself a through association.
        source: Option<Box<AssociationDescriptor>>,
        collection: bool,
    },
}

impl AssociationKind {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::DirectReference => "direct_reference",
            Self::PolymorphicReference { .. } => "polymorphic_reference",
            Self::ReversedSingle { .. } => "reversed_single",
            Self::ReversedMany { .. } => "reversed_many",
            Self::NestedOwned { .. } => "nested_owned",
            Self::ManyToMany { .. } => "many_to_many",
            Self::Through { .. } => "through",
        }
    }

    /// Discriminator constraining the target side, if any.
    #[must_use]
    pub fn discriminator(&self) -> Option<&Discriminator> {
        match self {
            Self::PolymorphicReference { discriminator } => Some(discriminator),
            Self::ReversedSingle { discriminator }
            | Self::ReversedMany { discriminator }
            | Self::NestedOwned { discriminator } => discriminator.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationDescriptor {
    pub name: String,
    pub kind: AssociationKind,
    /// `None` only for polymorphic references, whose target varies per row.
    pub target: Option<AssociationTarget>,
    /// Direct/polymorphic: column on the owner. Reversed: column on the
    /// target. Many-to-many: join table column pointing at the owner.
    /// Through: the through association's key.
    pub foreign_key: String,
}


/// An address sub-relation selected by the `<category>_address` convention.
#[derive(Debug, Clone)]
pub struct AddressScope {
    pub association: AssociationDescriptor,
    pub category: String,
    /// Addresses of this entity's type in `category`.
    pub relation: Relation,
}

pub struct AssociationCatalog {
    owner: EntityReference,
    descriptors: Vec<AssociationDescriptor>,
    provider: Arc<dyn EntityMetadataProvider>,
}

impl std::fmt::Debug for AssociationCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssociationCatalog")
            .field("owner", &self.owner.type_name)
            .field("descriptors", &self.descriptors)
            .finish()
    }
}

impl AssociationCatalog {
    pub(crate) fn build(
        owner: &EntityReference,
        metadata: &EntityMetadata,
        cache: &MetadataCache,
        provider: Arc<dyn EntityMetadataProvider>,
    ) -> Self {
        let direct: Vec<AssociationDescriptor> = metadata
            .associations
            .iter()
            .filter(|def| def.options.through.is_none())
            .map(|def| describe(owner, def, cache))
            .collect();

        let descriptors = metadata
            .associations
            .iter()
            .filter_map(|def| match &def.options.through {
                None => direct.iter().find(|d| d.name == def.name).cloned(),
                Some(through) => describe_through(owner, def, through, &direct, cache),
            })
            .collect();

        Self {
            owner: owner.clone(),
            descriptors,
            provider,
        }
    }

    #[must_use]
    pub fn owner(&self) -> &EntityReference {
        &self.owner
    }

    pub fn all(&self) -> &[AssociationDescriptor] {
        &self.descriptors
    }

    fn filtered(&self, pred: impl Fn(&AssociationKind) -> bool) -> Vec<&AssociationDescriptor> {
        self.descriptors.iter().filter(|d| pred(&d.kind)).collect()
    }

    /// Direct references (`belongs_to`), polymorphic ones included.
    pub fn direct_references(&self) -> Vec<&AssociationDescriptor> {
        self.filtered(|k| {
            matches!(
                k,
                AssociationKind::DirectReference | AssociationKind::PolymorphicReference { .. }
            )
        })
    }

    pub fn reversed_singles(&self) -> Vec<&AssociationDescriptor> {
        self.filtered(|k| matches!(k, AssociationKind::ReversedSingle { .. }))
    }

    /// Reversed-many associations, without nested owned children.
    pub fn reversed_manys(&self) -> Vec<&AssociationDescriptor> {
        self.filtered(|k| matches!(k, AssociationKind::ReversedMany { .. }))
    }

    pub fn many_to_manys(&self) -> Vec<&AssociationDescriptor> {
        self.filtered(|k| matches!(k, AssociationKind::ManyToMany { .. }))
    }

    pub fn nested_owned_children(&self) -> Vec<&AssociationDescriptor> {
        self.filtered(|k| matches!(k, AssociationKind::NestedOwned { .. }))
    }

    fn named(&self, name: &str, pred: impl Fn(&AssociationKind) -> bool) -> Option<&AssociationDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.name == name && pred(&d.kind))
    }

    /// Non-polymorphic direct reference for `name` or `name_id`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&AssociationDescriptor> {
        let name = name.strip_suffix("_id").unwrap_or(name);
        self.named(name, |k| matches!(k, AssociationKind::DirectReference))
    }

    #[must_use]
    pub fn find_polymorphic(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.named(name, |k| matches!(k, AssociationKind::PolymorphicReference { .. }))
    }

    #[must_use]
    pub fn find_many_to_many(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.named(name, |k| matches!(k, AssociationKind::ManyToMany { .. }))
    }

    /// Reversed-many or nested owned association called `name`.
    #[must_use]
    pub fn find_reversed_many(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.named(name, |k| {
            matches!(
                k,
                AssociationKind::ReversedMany { .. } | AssociationKind::NestedOwned { .. }
            )
        })
    }

    #[must_use]
    pub fn find_reversed_single(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.named(name, |k| matches!(k, AssociationKind::ReversedSingle { .. }))
    }

    #[must_use]
    pub fn find_through(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.named(name, |k| matches!(k, AssociationKind::Through { .. }))
    }

    /// Any association called `name` (or `name` without an `_id` suffix).
    #[must_use]
    pub fn associated(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.named(name, |_| true).or_else(|| {
            name.strip_suffix("_id")
                .and_then(|stripped| self.named(stripped, |_| true))
        })
    }

    /// `<category>_address` / `<category>_addresses` over this entity's
    /// `addresses` association, when that association targets an address.
    #[must_use]
    pub fn find_address_association(&self, name: &str) -> Option<AddressScope> {
        let category = ADDRESS_SUFFIXES
            .iter()
            .find_map(|suffix| name.strip_suffix(suffix))
            .filter(|category| !category.is_empty())?;

        let association = self.find_reversed_many(ADDRESSES)?;
        let target = association
            .target
            .as_ref()
            .filter(|target| target.reference.base_type_name() == ADDRESS_TYPE)?;

        let mut relation = Relation::new(&target.table, &target.reference.type_name).filter(
            Fragment::with_params(
                format!("{} = ?", target.qualified("category")),
                vec![SqlParam::Text(category.to_string())],
            ),
        );
        if let Some(discriminator) = association.kind.discriminator() {
            relation = relation.filter(Fragment::with_params(
                format!("{} = ?", target.qualified(&discriminator.type_column)),
                vec![SqlParam::Text(self.owner.type_name.clone())],
            ));
        }

        Some(AddressScope {
            association: association.clone(),
            category: category.to_string(),
            relation,
        })
    }

    /// Whether member `name` yields a relation when invoked.
    ///
    /// The member runs inside a transaction that is always rolled back; any
    /// failure means "not a scope".
    pub async fn is_scope(&self, name: &str, pool: &AnyPool) -> bool {
        let Some(member) = self.provider.member(&self.owner.type_name, name) else {
            metrics::record_scope_probe("missing");
            return false;
        };

        let outcome = with_rollback(pool, move |conn| {
            Box::pin(async move { member.invoke(conn).await })
        })
        .await;

        match outcome {
            Ok(MemberOutput::Relation(_)) => {
                metrics::record_scope_probe("scope");
                true
            }
            Ok(MemberOutput::Value(_)) => {
                metrics::record_scope_probe("value");
                false
            }
            Err(e) => {
                warn!(entity = %self.owner, member = name, error = %e, "scope probe failed");
                metrics::record_scope_probe("error");
                false
            }
        }
    }
}

/// Descriptor for a non-through association declared on `owner`.
fn describe(owner: &EntityReference, def: &AssociationDefinition, cache: &MetadataCache) -> AssociationDescriptor {
    let options = &def.options;
    let reversed_discriminator = || {
        options.as_.as_ref().map(|interface| Discriminator {
            type_column: format!("{interface}_type"),
            id_column: format!("{interface}_id"),
            type_value: Some(owner.type_name.clone()),
        })
    };
    let reversed_key = || {
        options
            .foreign_key
            .clone()
            .or_else(|| options.as_.as_ref().map(|interface| format!("{interface}_id")))
            .unwrap_or_else(|| owner.foreign_key())
    };

    let (kind, target, foreign_key) = match def.kind {
        AssociationMacro::BelongsTo if options.polymorphic => {
            let id_column = options
                .foreign_key
                .clone()
                .unwrap_or_else(|| format!("{}_id", def.name));
            let discriminator = Discriminator {
                type_column: format!("{}_type", def.name),
                id_column: id_column.clone(),
                type_value: None,
            };
            (AssociationKind::PolymorphicReference { discriminator }, None, id_column)
        }
        AssociationMacro::BelongsTo => {
            let target = cache.target_for(owner, options.class_name.as_deref(), &camelize(&def.name));
            let foreign_key = options
                .foreign_key
                .clone()
                .unwrap_or_else(|| format!("{}_id", def.name));
            (AssociationKind::DirectReference, Some(target), foreign_key)
        }
        AssociationMacro::HasOne => {
            let target = cache.target_for(owner, options.class_name.as_deref(), &camelize(&def.name));
            let kind = AssociationKind::ReversedSingle {
                discriminator: reversed_discriminator(),
            };
            (kind, Some(target), reversed_key())
        }
        AssociationMacro::HasMany => {
            let target = cache.target_for(owner, options.class_name.as_deref(), &classify(&def.name));
            let discriminator = reversed_discriminator();
            let kind = if options.autosave {
                AssociationKind::NestedOwned { discriminator }
            } else {
                AssociationKind::ReversedMany { discriminator }
            };
            (kind, Some(target), reversed_key())
        }
        AssociationMacro::HasAndBelongsToMany => {
            let target = cache.target_for(owner, options.class_name.as_deref(), &classify(&def.name));
            let join_table = options.join_table.clone().unwrap_or_else(|| {
                let mut tables = [owner.table_name(), target.table.clone()];
                tables.sort();
                tables.join("_")
            });
            let association_foreign_key = options
                .association_foreign_key
                .clone()
                .unwrap_or_else(|| target.reference.foreign_key());
            let foreign_key = options
                .foreign_key
                .clone()
                .unwrap_or_else(|| owner.foreign_key());
            let kind = AssociationKind::ManyToMany {
                join_table,
                association_foreign_key,
            };
            (kind, Some(target), foreign_key)
        }
    };

    AssociationDescriptor {
        name: def.name.clone(),
        kind,
        target,
        foreign_key,
    }
}

fn describe_through(
    owner: &EntityReference,
    def: &AssociationDefinition,
    through_name: &str,
    siblings: &[AssociationDescriptor],
    cache: &MetadataCache,
) -> Option<AssociationDescriptor> {
    let Some(through) = siblings.iter().find(|d| d.name == through_name) else {
        debug!(entity = %owner, association = %def.name, through = through_name, "through association not declared");
        return None;
    };

    let source = through.target.as_ref().and_then(|intermediate| {
        let (reference, metadata) = cache.metadata_for(&intermediate.reference.type_name)?;
        let candidates = [
            def.options.source.clone(),
            Some(singularize(&def.name)),
            Some(pluralize(&def.name)),
            Some(def.name.clone()),
        ];
        let source_def = candidates.iter().flatten().find_map(|candidate| {
            metadata.associations.iter().find(|a| &a.name == candidate)
        })?;
        if source_def.options.through.is_some() {
            return None;
        }
        Some(Box::new(describe(&reference, source_def, cache)))
    });

    let target = match (&def.options.source_type, &source) {
        (Some(source_type), _) => Some(cache.target_for(owner, Some(source_type), source_type)),
        (None, Some(source)) => source.target.clone(),
        (None, None) => def
            .options
            .class_name
            .as_deref()
            .map(|class_name| cache.target_for(owner, Some(class_name), class_name)),
    };

    Some(AssociationDescriptor {
        name: def.name.clone(),
        foreign_key: through.foreign_key.clone(),
        kind: AssociationKind::Through {
            through: Box::new(through.clone()),
            source,
            collection: def.kind != AssociationMacro::HasOne,
        },
        target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ColumnType, StaticMetadataProvider};

    fn cache() -> MetadataCache {
        let provider = StaticMetadataProvider::new()
            .with_entity(
                EntityMetadata::new("Post")
                    .column("title", ColumnType::String)
                    .column("author_id", ColumnType::Integer)
                    .association(AssociationDefinition::belongs_to("author").class_name("User"))
                    .association(AssociationDefinition::belongs_to("subject").polymorphic())
                    .association(AssociationDefinition::has_many("comments"))
                    .association(AssociationDefinition::has_many("attachments").autosave())
                    .association(AssociationDefinition::has_one("summary"))
                    .association(AssociationDefinition::has_and_belongs_to_many("tags"))
                    .association(AssociationDefinition::has_many("commenters").through("comments").source("user"))
                    .association(AssociationDefinition::has_many("addresses").as_interface("addressable")),
            )
            .with_entity(EntityMetadata::new("User").column("email", ColumnType::Email))
            .with_entity(
                EntityMetadata::new("Comment")
                    .association(AssociationDefinition::belongs_to("post"))
                    .association(AssociationDefinition::belongs_to("user")),
            )
            .with_entity(EntityMetadata::new("Tag").column("name", ColumnType::String))
            .with_entity(EntityMetadata::new("Address").column("city", ColumnType::String));
        MetadataCache::new(Arc::new(provider))
    }

    #[test]
    fn test_find_strips_id_suffix() {
        let cache = cache();
        let post = cache.entity("Post").unwrap();
        let catalog = post.catalog();

        assert_eq!(catalog.find("author_id"), catalog.find("author"));
        let author = catalog.find("author").unwrap();
        assert_eq!(author.foreign_key, "author_id");
        assert_eq!(author.target.as_ref().unwrap().table, "users");
        assert!(!catalog.reversed_manys().iter().any(|d| d.name == "author"));
    }

    #[test]
    fn test_polymorphic_is_not_found_by_find() {
        let cache = cache();
        let post = cache.entity("Post").unwrap();
        let catalog = post.catalog();

        assert!(catalog.find("subject").is_none());
        let subject = catalog.find_polymorphic("subject").unwrap();
        let discriminator = subject.kind.discriminator().unwrap();
        assert_eq!(discriminator.type_column, "subject_type");
        assert_eq!(discriminator.id_column, "subject_id");
        assert!(subject.target.is_none());
    }

    #[test]
    fn test_nested_children_are_separate_from_reversed_manys() {
        let cache = cache();
        let post = cache.entity("Post").unwrap();
        let catalog = post.catalog();

        let reversed: Vec<_> = catalog.reversed_manys().iter().map(|d| d.name.clone()).collect();
        let nested: Vec<_> = catalog.nested_owned_children().iter().map(|d| d.name.clone()).collect();
        assert_eq!(reversed, vec!["comments", "addresses"]);
        assert_eq!(nested, vec!["attachments"]);
        assert!(catalog.find_reversed_many("attachments").is_some());

        let comments = catalog.find_reversed_many("comments").unwrap();
        assert_eq!(comments.foreign_key, "post_id");
    }

    #[test]
    fn test_many_to_many_defaults() {
        let cache = cache();
        let post = cache.entity("Post").unwrap();
        let tags = post.catalog().find_many_to_many("tags").unwrap();

        assert_eq!(tags.foreign_key, "post_id");
        assert_eq!(
            tags.kind,
            AssociationKind::ManyToMany {
                join_table: "posts_tags".to_string(),
                association_foreign_key: "tag_id".to_string(),
            }
        );
    }

    #[test]
    fn test_through_resolves_source() {
        let cache = cache();
        let post = cache.entity("Post").unwrap();
        let commenters = post.catalog().find_through("commenters").unwrap();

        assert_eq!(commenters.target.as_ref().unwrap().reference.type_name, "User");
        let AssociationKind::Through { through, source, collection } = &commenters.kind else {
            panic!("expected a through association");
        };
        assert!(collection);
        assert_eq!(through.name, "comments");
        let source = source.as_ref().unwrap();
        assert_eq!(source.kind, AssociationKind::DirectReference);
        assert_eq!(source.foreign_key, "user_id");
    }

    #[test]
    fn test_address_convention() {
        let cache = cache();
        let post = cache.entity("Post").unwrap();
        let scope = post.catalog().find_address_association("billing_address").unwrap();

        assert_eq!(scope.category, "billing");
        assert_eq!(scope.association.foreign_key, "addressable_id");
        let sql = scope.relation.to_sql_inline("addresses.addressable_id");
        assert_eq!(
            sql,
            "SELECT addresses.addressable_id FROM addresses WHERE (addresses.category = 'billing') \
             AND (addresses.addressable_type = 'Post')"
        );

        assert!(post.catalog().find_address_association("address").is_none());
        assert!(post.catalog().find_address_association("title").is_none());
    }

    #[test]
    fn test_address_convention_needs_addresses_association() {
        let cache = cache();
        let user = cache.entity("User").unwrap();
        assert!(user.catalog().find_address_association("billing_address").is_none());
    }

    #[test]
    fn test_address_convention_needs_address_target() {
        let provider = StaticMetadataProvider::new()
            .with_entity(
                EntityMetadata::new("Shop")
                    .association(AssociationDefinition::has_many("addresses").class_name("Location")),
            )
            .with_entity(EntityMetadata::new("Location").column("city", ColumnType::String));
        let cache = MetadataCache::new(Arc::new(provider));
        let shop = cache.entity("Shop").unwrap();

        assert!(shop.catalog().find_reversed_many("addresses").is_some());
        assert!(shop.catalog().find_address_association("billing_address").is_none());
    }

    #[test]
    fn test_address_convention_accepts_namespaced_address() {
        let provider = StaticMetadataProvider::new()
            .with_entity(
                EntityMetadata::new("Shop")
                    .association(AssociationDefinition::has_many("addresses").class_name("Geo::Address")),
            )
            .with_entity(EntityMetadata::new("Geo::Address").column("city", ColumnType::String));
        let cache = MetadataCache::new(Arc::new(provider));
        let shop = cache.entity("Shop").unwrap();

        let scope = shop.catalog().find_address_association("shipping_address").unwrap();
        assert_eq!(scope.category, "shipping");
    }
}
