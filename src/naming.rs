// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entity name resolution.
//!
//! Turns a free-form identifier into an [`EntityReference`]:
//!
//! ```rust
//! use query_engine::naming::NameResolver;
//!
//! let names = NameResolver::new();
//! let post = names.resolve("admin/posts").unwrap();
//! assert_eq!(post.singular_name, "post");
//! assert_eq!(post.plural_name, "posts");
//! assert_eq!(post.type_name, "Admin::Post");
//! assert_eq!(post.namespace(), Some("admin".to_string()));
//!
//! // The canonical type name resolves to the same reference.
//! assert_eq!(names.resolve(&post.type_name).unwrap(), post);
//! ```
//!
//! Accepted spellings: `post`, `Post`, `posts`, `Admin::Post`, `admin::Post`,
//! `admin/posts`, `admin/effective::post`. Path (`/`) and module (`::`)
//! separators are interchangeable.

use std::collections::HashMap;

use convert_case::{Case, Casing};
use parking_lot::RwLock;

use crate::error::QueryError;

const TYPE_SEPARATOR: &str = "::";

/// Canonical identity of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityReference {
    /// "post"
    pub singular_name: String,
    /// "posts"
    pub plural_name: String,
    /// "Admin::Post"
    pub type_name: String,
    /// ["admin"]
    pub namespaces: Vec<String>,
    /// "Admin Post"
    pub human_name: String,
}

impl EntityReference {
    /// Pure parse of `identifier`. Fails only when no segment is left.
    pub fn parse(identifier: &str) -> Result<Self, QueryError> {
        let segments: Vec<&str> = identifier
            .split(['/', ':'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let Some((last, parents)) = segments.split_last() else {
            return Err(QueryError::InvalidIdentifier(identifier.to_string()));
        };

        let singular_name = singularize(&underscore(last));
        let plural_name = pluralize(&singular_name);
        let namespaces: Vec<String> = parents.iter().map(|s| underscore(s)).collect();

        let type_name = namespaces
            .iter()
            .map(|ns| camelize(ns))
            .chain(std::iter::once(camelize(&singular_name)))
            .collect::<Vec<_>>()
            .join(TYPE_SEPARATOR);
        let human_name = type_name.replace(TYPE_SEPARATOR, " ");

        Ok(Self {
            singular_name,
            plural_name,
            type_name,
            namespaces,
            human_name,
        })
    }

    /// Namespace path joined with `/`, `None` at the top level.
    #[must_use]
    pub fn namespace(&self) -> Option<String> {
        if self.namespaces.is_empty() {
            None
        } else {
            Some(self.namespaces.join("/"))
        }
    }

    /// Last segment of the type name ("Post" for "Admin::Post").
    #[must_use]
    pub fn base_type_name(&self) -> &str {
        self.type_name
            .rsplit(TYPE_SEPARATOR)
            .next()
            .unwrap_or(&self.type_name)
    }

    /// Conventional table name: namespaces and plural joined by `_`.
    #[must_use]
    pub fn table_name(&self) -> String {
        self.namespaces
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.plural_name.as_str()))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Conventional column pointing at this entity ("post_id").
    #[must_use]
    pub fn foreign_key(&self) -> String {
        format!("{}_id", self.singular_name)
    }
}

impl std::fmt::Display for EntityReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.type_name)
    }
}

/// Memoizing front for [`EntityReference::parse`].
#[derive(Debug, Default)]
pub struct NameResolver {
    memo: RwLock<HashMap<String, EntityReference>>,
}

impl NameResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, identifier: &str) -> Result<EntityReference, QueryError> {
        if let Some(found) = self.memo.read().get(identifier) {
            return Ok(found.clone());
        }

        let reference = EntityReference::parse(identifier)?;
        self.memo
            .write()
            .insert(identifier.to_string(), reference.clone());
        Ok(reference)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.memo.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.memo.read().is_empty()
    }
}

// =============================================================================
// Inflection
// =============================================================================

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("man", "men"),
    ("woman", "women"),
    ("child", "children"),
    ("mouse", "mice"),
    ("goose", "geese"),
    ("tooth", "teeth"),
    ("foot", "feet"),
    ("ox", "oxen"),
    ("leaf", "leaves"),
    ("life", "lives"),
    ("wife", "wives"),
    ("knife", "knives"),
    ("half", "halves"),
];

const UNCOUNTABLE: &[&str] = &[
    "equipment",
    "information",
    "rice",
    "money",
    "species",
    "series",
    "fish",
    "sheep",
    "news",
    "metadata",
    "feedback",
];

/// Split `word` at its last `_` so rules only touch the final word.
fn split_last_word(word: &str) -> (&str, &str) {
    match word.rfind('_') {
        Some(pos) => word.split_at(pos + 1),
        None => ("", word),
    }
}

pub fn pluralize(word: &str) -> String {
    let (head, last) = split_last_word(word);
    let lower = last.to_ascii_lowercase();

    if lower.is_empty() || UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == lower) {
        return format!("{head}{plural}");
    }
    if IRREGULAR.iter().any(|(_, plural)| *plural == lower) {
        return word.to_string();
    }

    let plural = if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        format!("{last}es")
    } else if lower.ends_with('y') && !ends_with_vowel_y(&lower) {
        format!("{}ies", &last[..last.len() - 1])
    } else {
        format!("{last}s")
    };
    format!("{head}{plural}")
}

pub fn singularize(word: &str) -> String {
    let (head, last) = split_last_word(word);
    let lower = last.to_ascii_lowercase();

    if lower.is_empty() || UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }
    if let Some((singular, _)) = IRREGULAR.iter().find(|(_, plural)| *plural == lower) {
        return format!("{head}{singular}");
    }
    if IRREGULAR.iter().any(|(singular, _)| *singular == lower) {
        return word.to_string();
    }

    let cut = |n: usize| last[..last.len() - n].to_string();
    let singular = if lower.ends_with("ies") && lower.len() > 3 {
        format!("{}y", cut(3))
    } else if ["sses", "shes", "ches", "xes", "zzes", "uses"]
        .iter()
        .any(|s| lower.ends_with(s))
    {
        cut(2)
    } else if lower.ends_with("ss") || lower.ends_with("us") || lower.ends_with("is") {
        last.to_string()
    } else if lower.ends_with('s') && lower.len() > 1 {
        cut(1)
    } else {
        last.to_string()
    };
    format!("{head}{singular}")
}

fn ends_with_vowel_y(lower: &str) -> bool {
    let mut chars = lower.chars().rev();
    chars.next();
    matches!(chars.next(), Some('a' | 'e' | 'i' | 'o' | 'u'))
}

/// "blog_post" / "BlogPost" -> "blog_post"
pub fn underscore(word: &str) -> String {
    word.to_case(Case::Snake)
}

/// "blog_post" -> "BlogPost"
pub fn camelize(word: &str) -> String {
    word.to_case(Case::Pascal)
}

/// Singular type name for a (possibly plural) table or association name.
pub fn classify(word: &str) -> String {
    camelize(&singularize(&underscore(word)))
}
