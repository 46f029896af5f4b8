// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Relation handle: a chainable, owned description of "rows of entity E under
//! the current filters and ordering".
//!
//! The compiler only ever composes onto a [`Relation`]; rendering to SQL is
//! deferred until an executor plucks from it.
//!
//! ```rust
//! use query_engine::relation::{Dialect, Direction, Fragment, Relation, SqlParam};
//!
//! let relation = Relation::new("posts", "Post")
//!     .filter(Fragment::with_params("posts.title LIKE ?", vec![SqlParam::Text("%rust%".into())]))
//!     .order(Fragment::new(Dialect::Postgres.order_nulls_last("posts.id", Direction::Asc)))
//!     .limit(10);
//!
//! let sql = relation.to_sql(Dialect::Postgres, "posts.id");
//! assert_eq!(
//!     sql.sql,
//!     "SELECT posts.id FROM posts WHERE posts.title LIKE $1 ORDER BY posts.id ASC NULLS LAST LIMIT 10"
//! );
//! ```

mod dialect;
mod keys;

pub use dialect::Dialect;
pub use keys::{KeySet, KeyValue, SENTINEL_KEY};

/// SQL parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

/// A piece of SQL with `?` placeholders and the values that fill them, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Fragment {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A condition no row satisfies.
    #[must_use]
    pub fn never() -> Self {
        Self::new("1=0")
    }

    /// Join fragments with `separator`, concatenating their parameters.
    #[must_use]
    pub fn join(fragments: Vec<Fragment>, separator: &str) -> Self {
        let mut sql = Vec::with_capacity(fragments.len());
        let mut params = Vec::new();
        for fragment in fragments {
            sql.push(fragment.sql);
            params.extend(fragment.params);
        }
        Self {
            sql: sql.join(separator),
            params,
        }
    }
}

impl From<String> for Fragment {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

impl From<&str> for Fragment {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

/// Rendered statement with dialect-specific placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    /// Lenient parse: anything starting with "desc" (any case) is descending.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.trim().to_ascii_lowercase().starts_with("desc") {
            Self::Desc
        } else {
            Self::Asc
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    table: String,
    type_name: String,
    joins: Vec<String>,
    conditions: Vec<Fragment>,
    groups: Vec<String>,
    havings: Vec<Fragment>,
    orders: Vec<Fragment>,
    limit: Option<usize>,
}

impl Relation {
    /// Unfiltered, unordered rows of `table`.
    pub fn new(table: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            type_name: type_name.into(),
            joins: Vec::new(),
            conditions: Vec::new(),
            groups: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            limit: None,
        }
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn conditions(&self) -> &[Fragment] {
        &self.conditions
    }

    #[must_use]
    pub fn havings(&self) -> &[Fragment] {
        &self.havings
    }

    #[must_use]
    pub fn orders(&self) -> &[Fragment] {
        &self.orders
    }

    #[must_use]
    pub fn filter(mut self, condition: impl Into<Fragment>) -> Self {
        self.conditions.push(condition.into());
        self
    }

    #[must_use]
    pub fn having(mut self, condition: impl Into<Fragment>) -> Self {
        self.havings.push(condition.into());
        self
    }

    #[must_use]
    pub fn group(mut self, expr: impl Into<String>) -> Self {
        self.groups.push(expr.into());
        self
    }

    #[must_use]
    pub fn order(mut self, expr: impl Into<Fragment>) -> Self {
        self.orders.push(expr.into());
        self
    }

    /// Append an ordering only when one was produced.
    #[must_use]
    pub fn order_opt(self, expr: Option<Fragment>) -> Self {
        match expr {
            Some(expr) => self.order(expr),
            None => self,
        }
    }

    /// Drop every ordering accumulated so far.
    #[must_use]
    pub fn reorder(mut self) -> Self {
        self.orders.clear();
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn join(mut self, clause: impl Into<String>) -> Self {
        self.joins.push(clause.into());
        self
    }

    /// Render `SELECT <projection> FROM ...` for `dialect`.
    #[must_use]
    pub fn to_sql(&self, dialect: Dialect, projection: &str) -> SqlQuery {
        let mut params = Vec::new();
        let mut sql = format!("SELECT {projection} FROM {}", self.table);

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }

        if let Some(clause) = Self::conjunction(&self.conditions, &mut params) {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }

        if !self.groups.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.groups.join(", "));
        }

        if let Some(clause) = Self::conjunction(&self.havings, &mut params) {
            sql.push_str(" HAVING ");
            sql.push_str(&clause);
        }

        if !self.orders.is_empty() {
            let orders: Vec<&str> = self
                .orders
                .iter()
                .map(|o| {
                    params.extend(o.params.iter().cloned());
                    o.sql.as_str()
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        if dialect.is_postgres() {
            sql = Self::number_placeholders(&sql);
        }

        SqlQuery { sql, params }
    }

    /// Render with parameter values inlined.
    ///
    /// Warning: Only use for logging and debugging, never execute the result.
    #[must_use]
    pub fn to_sql_inline(&self, projection: &str) -> String {
        let SqlQuery { sql, params } = self.to_sql(Dialect::MySql, projection);

        let mut result = sql;
        for param in params {
            let value = match param {
                SqlParam::Text(s) => format!("'{}'", s.replace('\'', "''")),
                SqlParam::Integer(n) => n.to_string(),
                SqlParam::Float(n) => n.to_string(),
                SqlParam::Boolean(b) => if b { "TRUE" } else { "FALSE" }.to_string(),
            };
            result = result.replacen('?', &value, 1);
        }
        result
    }

    fn conjunction(conditions: &[Fragment], params: &mut Vec<SqlParam>) -> Option<String> {
        if conditions.is_empty() {
            return None;
        }
        let parts: Vec<String> = conditions
            .iter()
            .map(|c| {
                params.extend(c.params.iter().cloned());
                if conditions.len() == 1 {
                    c.sql.clone()
                } else {
                    format!("({})", c.sql)
                }
            })
            .collect();
        Some(parts.join(" AND "))
    }

    /// `?` -> `$1, $2, ...` for PostgreSQL.
    fn number_placeholders(sql: &str) -> String {
        let mut out = String::with_capacity(sql.len() + 8);
        let mut n = 0;
        for ch in sql.chars() {
            if ch == '?' {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            } else {
                out.push(ch);
            }
        }
        out
    }
}
