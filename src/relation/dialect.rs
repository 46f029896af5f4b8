// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL dialect differences the compiler has to paper over.
//!
//! | concern            | MySQL                  | PostgreSQL             | SQLite                              |
//! |--------------------|------------------------|------------------------|-------------------------------------|
//! | nulls last         | `ISNULL(c), c DIR`     | `c DIR NULLS LAST`     | `c IS NULL, c DIR`                  |
//! | fuzzy match        | `LIKE`                 | `ILIKE`                | `LIKE`                              |
//! | hour of a time     | `EXTRACT(HOUR FROM c)` | `EXTRACT(HOUR FROM c)` | `CAST(strftime('%H', c) AS INTEGER)`|
//! | timestamp param    | `?`                    | `CAST($n AS timestamp)`| `?`                                 |

use serde::Deserialize;

use super::Direction;

/// Relational engine the compiled fragments target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[serde(alias = "mariadb")]
    MySql,
    #[serde(alias = "postgresql")]
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Detect the dialect from a connection URL scheme.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split(':').next()?.to_ascii_lowercase();
        match scheme.as_str() {
            "mysql" | "mariadb" => Some(Self::MySql),
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_postgres(self) -> bool {
        self == Self::Postgres
    }

    /// Case-insensitive pattern match operator.
    #[must_use]
    pub fn fuzzy_operator(self) -> &'static str {
        match self {
            Self::Postgres => "ILIKE",
            Self::MySql | Self::Sqlite => "LIKE",
        }
    }

    /// Order by `expr`, placing NULLs last in either direction.
    #[must_use]
    pub fn order_nulls_last(self, expr: &str, direction: Direction) -> String {
        let dir = direction.as_sql();
        match self {
            Self::MySql => format!("ISNULL({expr}), {expr} {dir}"),
            Self::Postgres => format!("{expr} {dir} NULLS LAST"),
            Self::Sqlite => format!("{expr} IS NULL, {expr} {dir}"),
        }
    }

    /// Text ordering: NULLs and empty strings after everything else.
    #[must_use]
    pub fn order_text(self, column: &str, direction: Direction) -> String {
        let dir = direction.as_sql();
        match self {
            Self::MySql => format!("ISNULL({column}), {column} = '' ASC, {column} {dir}"),
            Self::Postgres => format!("{column} = '' ASC, {column} {dir} NULLS LAST"),
            Self::Sqlite => format!("{column} IS NULL, {column} = '' ASC, {column} {dir}"),
        }
    }

    /// Time-of-day ordering by hour then minute, NULLs last.
    #[must_use]
    pub fn order_time(self, column: &str, direction: Direction) -> String {
        let dir = direction.as_sql();
        let hour = self.extract_hour(column);
        let minute = self.extract_minute(column);
        match self {
            Self::MySql => format!("ISNULL({column}), {hour} {dir}, {minute} {dir}"),
            Self::Postgres => format!("{hour} {dir} NULLS LAST, {minute} {dir} NULLS LAST"),
            Self::Sqlite => format!("{column} IS NULL, {hour} {dir}, {minute} {dir}"),
        }
    }

    #[must_use]
    pub fn extract_hour(self, column: &str) -> String {
        match self {
            Self::Sqlite => format!("CAST(strftime('%H', {column}) AS INTEGER)"),
            Self::MySql | Self::Postgres => format!("EXTRACT(HOUR FROM {column})"),
        }
    }

    #[must_use]
    pub fn extract_minute(self, column: &str) -> String {
        match self {
            Self::Sqlite => format!("CAST(strftime('%M', {column}) AS INTEGER)"),
            Self::MySql | Self::Postgres => format!("EXTRACT(MINUTE FROM {column})"),
        }
    }

    /// Placeholder for a textual timestamp parameter.
    #[must_use]
    pub fn timestamp_placeholder(self) -> &'static str {
        if self.is_postgres() {
            "CAST(? AS timestamp)"
        } else {
            "?"
        }
    }

    /// Placeholder for a textual date parameter.
    #[must_use]
    pub fn date_placeholder(self) -> &'static str {
        if self.is_postgres() {
            "CAST(? AS date)"
        } else {
            "?"
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        })
    }
}
