// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Key sets produced by key translation.
//!
//! A [`KeySet`] is the ordered, duplicate-free, null-stripped list of key
//! values plucked from a related table. It renders either as an `IN (...)`
//! membership filter or as a rank ordering (`col = k1 DESC, col = k2 DESC`).

use indexmap::IndexSet;

use super::{Fragment, SqlParam};

/// Key value substituted for an empty key set. No row has primary key 0.
pub const SENTINEL_KEY: i64 = 0;

/// A scalar key plucked from the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Integer(i64),
    Text(String),
}

impl From<KeyValue> for SqlParam {
    fn from(key: KeyValue) -> Self {
        match key {
            KeyValue::Integer(n) => SqlParam::Integer(n),
            KeyValue::Text(s) => SqlParam::Text(s),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<&str> for KeyValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    keys: IndexSet<KeyValue>,
}

impl KeySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw plucked values, dropping NULLs and later duplicates.
    pub fn from_plucked(values: impl IntoIterator<Item = Option<KeyValue>>) -> Self {
        values.into_iter().flatten().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.keys.iter()
    }

    /// `column IN (k1, k2, ...)`, or `column IN (0)` when empty so the
    /// statement stays well-formed and matches nothing.
    #[must_use]
    pub fn in_list(&self, column: &str) -> Fragment {
        if self.keys.is_empty() {
            return Fragment::with_params(
                format!("{column} IN (?)"),
                vec![SqlParam::Integer(SENTINEL_KEY)],
            );
        }

        let placeholders = vec!["?"; self.keys.len()].join(", ");
        Fragment::with_params(
            format!("{column} IN ({placeholders})"),
            self.keys.iter().cloned().map(SqlParam::from).collect(),
        )
    }

    /// Rank ordering: rows whose `column` equals an earlier key sort first,
    /// rows matching no key sort after all ranked rows.
    ///
    /// Returns `None` for an empty set.
    #[must_use]
    pub fn rank_order(&self, column: &str) -> Option<Fragment> {
        if self.keys.is_empty() {
            return None;
        }

        let sql = vec![format!("{column} = ? DESC"); self.keys.len()].join(", ");
        Some(Fragment::with_params(
            sql,
            self.keys.iter().cloned().map(SqlParam::from).collect(),
        ))
    }
}

impl FromIterator<KeyValue> for KeySet {
    fn from_iter<I: IntoIterator<Item = KeyValue>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for KeySet {
    type Item = KeyValue;
    type IntoIter = indexmap::set::IntoIter<KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_plucked_dedups_and_strips_nulls() {
        let keys = KeySet::from_plucked(vec![
            Some(KeyValue::Integer(3)),
            None,
            Some(KeyValue::Integer(1)),
            Some(KeyValue::Integer(3)),
            Some(KeyValue::Integer(2)),
        ]);
        let order: Vec<_> = keys.iter().cloned().collect();
        assert_eq!(
            order,
            vec![KeyValue::Integer(3), KeyValue::Integer(1), KeyValue::Integer(2)]
        );
    }

    #[test]
    fn test_empty_in_list_uses_sentinel() {
        let fragment = KeySet::new().in_list("posts.author_id");
        assert_eq!(fragment.sql, "posts.author_id IN (?)");
        assert_eq!(fragment.params, vec![SqlParam::Integer(0)]);
    }

    #[test]
    fn test_in_list() {
        let keys: KeySet = vec![KeyValue::from(5), KeyValue::from(7)].into_iter().collect();
        let fragment = keys.in_list("posts.id");
        assert_eq!(fragment.sql, "posts.id IN (?, ?)");
        assert_eq!(fragment.params, vec![SqlParam::Integer(5), SqlParam::Integer(7)]);
    }

    #[test]
    fn test_rank_order() {
        let keys: KeySet = vec![KeyValue::from(9), KeyValue::from(4)].into_iter().collect();
        let fragment = keys.rank_order("posts.author_id").unwrap();
        assert_eq!(fragment.sql, "posts.author_id = ? DESC, posts.author_id = ? DESC");
        assert_eq!(fragment.params, vec![SqlParam::Integer(9), SqlParam::Integer(4)]);
        assert!(KeySet::new().rank_order("posts.author_id").is_none());
    }
}
