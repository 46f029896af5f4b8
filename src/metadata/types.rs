// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Semantic types and search value parsing.
//!
//! A field's semantic type decides how the compiler sorts and filters by it.
//! Resolution order for a field name:
//!
//! 1. association (direct, polymorphic, reversed, many-to-many, through)
//! 2. obfuscated primary key
//! 3. role bitmask (`roles`)
//! 4. address convention (`<category>_address`)
//! 5. declared column type
//! 6. `*_id` → integer, anything else → string
//!
//! # Parsing
//!
//! ```rust
//! use query_engine::metadata::types::{parse_value, DatePrecision, SemanticType, TypedValue};
//! use serde_json::json;
//!
//! let TypedValue::Timestamp { precision, .. } = parse_value(SemanticType::Date, &json!("2024-03")).unwrap() else {
//!     unreachable!()
//! };
//! assert_eq!(precision, DatePrecision::Month);
//!
//! assert_eq!(parse_value(SemanticType::Price, &json!("$10.50")).unwrap(), TypedValue::Integer(1050));
//! assert_eq!(parse_value(SemanticType::Duration, &json!("1h 30m")).unwrap(), TypedValue::Duration(5400));
//! assert_eq!(parse_value(SemanticType::Integer, &json!("nil")).unwrap(), TypedValue::Null);
//! ```

use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;

use super::cache::Entity;
use super::catalog::{AssociationDescriptor, AssociationKind, ADDRESSES};
use super::ColumnType;
use crate::error::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticType {
    String,
    Text,
    Email,
    Integer,
    Decimal,
    Float,
    Currency,
    Percentage,
    Duration,
    Price,
    Boolean,
    Date,
    Datetime,
    Time,
    Binary,
    Json,
    DirectReference,
    PolymorphicReference,
    ReversedSingle,
    ReversedMany,
    ManyToMany,
    Addresses,
    ObfuscatedId,
    Roles,
}

impl SemanticType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Text => "text",
            Self::Email => "email",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Float => "float",
            Self::Currency => "currency",
            Self::Percentage => "percentage",
            Self::Duration => "duration",
            Self::Price => "price",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Time => "time",
            Self::Binary => "binary",
            Self::Json => "json",
            Self::DirectReference => "belongs_to",
            Self::PolymorphicReference => "belongs_to_polymorphic",
            Self::ReversedSingle => "has_one",
            Self::ReversedMany => "has_many",
            Self::ManyToMany => "has_and_belongs_to_many",
            Self::Addresses => "addresses",
            Self::ObfuscatedId => "obfuscated_id",
            Self::Roles => "roles",
        }
    }

    /// Compiled by translating keys through another entity.
    #[must_use]
    pub fn is_association(self) -> bool {
        matches!(
            self,
            Self::DirectReference | Self::ReversedSingle | Self::ReversedMany | Self::ManyToMany
        )
    }

    /// Whether a null-ish search value becomes `IS NULL` on the column.
    #[must_use]
    pub fn accepts_null_filter(self) -> bool {
        !matches!(
            self,
            Self::ReversedSingle
                | Self::ReversedMany
                | Self::ManyToMany
                | Self::PolymorphicReference
                | Self::Roles
                | Self::Addresses
        )
    }
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SemanticType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "string" => Self::String,
            "text" => Self::Text,
            "email" => Self::Email,
            "integer" | "bigint" => Self::Integer,
            "decimal" => Self::Decimal,
            "float" => Self::Float,
            "currency" => Self::Currency,
            "percentage" | "percent" => Self::Percentage,
            "duration" => Self::Duration,
            "price" => Self::Price,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "datetime" | "timestamp" => Self::Datetime,
            "time" => Self::Time,
            "binary" => Self::Binary,
            "json" => Self::Json,
            "belongs_to" => Self::DirectReference,
            "belongs_to_polymorphic" => Self::PolymorphicReference,
            "has_one" => Self::ReversedSingle,
            "has_many" => Self::ReversedMany,
            "has_and_belongs_to_many" => Self::ManyToMany,
            "addresses" => Self::Addresses,
            "obfuscated_id" => Self::ObfuscatedId,
            "roles" => Self::Roles,
            _ => return Err(QueryError::UnsupportedType(s.to_string())),
        })
    }
}

impl From<ColumnType> for SemanticType {
    fn from(column: ColumnType) -> Self {
        match column {
            ColumnType::String => Self::String,
            ColumnType::Text => Self::Text,
            ColumnType::Email => Self::Email,
            ColumnType::Integer => Self::Integer,
            ColumnType::Decimal => Self::Decimal,
            ColumnType::Float => Self::Float,
            ColumnType::Currency => Self::Currency,
            ColumnType::Percentage => Self::Percentage,
            ColumnType::Duration => Self::Duration,
            ColumnType::Price => Self::Price,
            ColumnType::Boolean => Self::Boolean,
            ColumnType::Date => Self::Date,
            ColumnType::Datetime => Self::Datetime,
            ColumnType::Time => Self::Time,
            ColumnType::Binary => Self::Binary,
            ColumnType::Json => Self::Json,
        }
    }
}

/// A semantic type plus the association it was derived from, if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedType<'a> {
    pub semantic: SemanticType,
    pub association: Option<&'a AssociationDescriptor>,
}

impl<'a> ResolvedType<'a> {
    fn scalar(semantic: SemanticType) -> Self {
        Self {
            semantic,
            association: None,
        }
    }

    fn associated(semantic: SemanticType, association: &'a AssociationDescriptor) -> Self {
        Self {
            semantic,
            association: Some(association),
        }
    }
}

/// Granularity implied by how many numeric components a date value has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DatePrecision {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl DatePrecision {
    #[must_use]
    pub fn from_components(count: usize) -> Self {
        match count {
            0 | 1 => Self::Year,
            2 => Self::Month,
            3 => Self::Day,
            4 => Self::Hour,
            5 => Self::Minute,
            _ => Self::Second,
        }
    }

    /// Last instant (microsecond resolution) of the bucket starting at `start`.
    #[must_use]
    pub fn bucket_end(self, start: NaiveDateTime) -> Option<NaiveDateTime> {
        let next = match self {
            Self::Year => NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)?.and_hms_opt(0, 0, 0)?,
            Self::Month => {
                let (year, month) = if start.month() == 12 {
                    (start.year() + 1, 1)
                } else {
                    (start.year(), start.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?
            }
            Self::Day => start.date().succ_opt()?.and_hms_opt(0, 0, 0)?,
            Self::Hour => start.checked_add_signed(Duration::hours(1))?,
            Self::Minute => start.checked_add_signed(Duration::minutes(1))?,
            Self::Second => start.checked_add_signed(Duration::seconds(1))?,
        };
        next.checked_sub_signed(Duration::microseconds(1))
    }
}

/// A search value converted for comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    /// The caller asked for "no value".
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Timestamp {
        at: NaiveDateTime,
        precision: DatePrecision,
    },
    Time(NaiveTime),
    /// Seconds.
    Duration(i64),
    /// Passed through unparsed (association searches, invalid obfuscated ids).
    Raw(String),
}

impl TypedValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Maps field names of one entity to semantic types and parses values.
#[derive(Debug, Clone, Copy)]
pub struct TypeResolver<'a> {
    entity: &'a Entity,
}

impl<'a> TypeResolver<'a> {
    #[must_use]
    pub fn new(entity: &'a Entity) -> Self {
        Self { entity }
    }

    #[must_use]
    pub fn resolve(&self, field: &str) -> ResolvedType<'a> {
        let entity = self.entity;
        let catalog = entity.catalog();

        if let Some(a) = catalog.find(field) {
            return ResolvedType::associated(SemanticType::DirectReference, a);
        }
        if let Some(a) = catalog.find_polymorphic(field) {
            return ResolvedType::associated(SemanticType::PolymorphicReference, a);
        }
        if let Some(a) = catalog.find_reversed_many(field) {
            return ResolvedType::associated(SemanticType::ReversedMany, a);
        }
        if let Some(a) = catalog.find_reversed_single(field) {
            return ResolvedType::associated(SemanticType::ReversedSingle, a);
        }
        if let Some(a) = catalog.find_many_to_many(field) {
            return ResolvedType::associated(SemanticType::ManyToMany, a);
        }
        if let Some(a) = catalog.find_through(field) {
            let semantic = match a.kind {
                AssociationKind::Through { collection: false, .. } => SemanticType::ReversedSingle,
                _ => SemanticType::ReversedMany,
            };
            return ResolvedType::associated(semantic, a);
        }

        let metadata = entity.metadata();
        if metadata.obfuscated_ids && (field == "id" || field == entity.primary_key()) {
            return ResolvedType::scalar(SemanticType::ObfuscatedId);
        }
        if !metadata.roles.is_empty() && (field == "roles" || field == "roles_mask") {
            return ResolvedType::scalar(SemanticType::Roles);
        }
        if catalog.find_address_association(field).is_some() {
            return ResolvedType {
                semantic: SemanticType::Addresses,
                association: catalog.find_reversed_many(ADDRESSES),
            };
        }

        if let Some(column) = entity.column_type(field) {
            return ResolvedType::scalar(column.into());
        }
        if field == "id" || field == entity.primary_key() || field.ends_with("_id") {
            return ResolvedType::scalar(SemanticType::Integer);
        }
        ResolvedType::scalar(SemanticType::String)
    }

    /// `field` forced to `semantic`, attaching whatever association shares its name.
    #[must_use]
    pub fn resolve_as(&self, field: &str, semantic: SemanticType) -> ResolvedType<'a> {
        let catalog = self.entity.catalog();
        let association = match semantic {
            SemanticType::Addresses => catalog.find_reversed_many(ADDRESSES),
            _ => catalog.associated(field),
        };
        ResolvedType { semantic, association }
    }

    /// Parse `raw` for comparison against a field of type `semantic`.
    pub fn parse(&self, semantic: SemanticType, raw: &Value) -> Result<TypedValue, QueryError> {
        if is_null_marker(raw) {
            return Ok(TypedValue::Null);
        }
        match semantic {
            SemanticType::ObfuscatedId => {
                let token = value_text(raw);
                Ok(match self.entity.deobfuscate(&token) {
                    Some(id) => TypedValue::Integer(id),
                    None => TypedValue::Raw(token),
                })
            }
            SemanticType::Roles => parse_roles(&self.entity.metadata().roles, &value_text(raw)),
            _ => parse_value(semantic, raw),
        }
    }
}

/// Parse `raw` for `semantic` without entity context.
///
/// Role bitmasks and obfuscated ids need the entity and come back as
/// [`TypedValue::Raw`]; use [`TypeResolver::parse`] for those.
pub fn parse_value(semantic: SemanticType, raw: &Value) -> Result<TypedValue, QueryError> {
    if is_null_marker(raw) {
        return Ok(TypedValue::Null);
    }
    let text = value_text(raw);

    match semantic {
        SemanticType::String
        | SemanticType::Text
        | SemanticType::Email
        | SemanticType::Binary
        | SemanticType::Json => Ok(TypedValue::Text(text)),

        SemanticType::Integer => parse_integer(semantic, raw, &text).map(TypedValue::Integer),

        SemanticType::Decimal
        | SemanticType::Float
        | SemanticType::Currency
        | SemanticType::Percentage => parse_decimal(semantic, &text).map(TypedValue::Decimal),

        SemanticType::Price => match raw {
            Value::Number(n) if n.is_i64() => Ok(TypedValue::Integer(n.as_i64().unwrap_or_default())),
            _ => {
                let dollars = parse_decimal(semantic, &text)?;
                dollars
                    .checked_mul(Decimal::ONE_HUNDRED)
                    .map(|cents| cents.round())
                    .and_then(|cents| cents.to_i64())
                    .map(TypedValue::Integer)
                    .ok_or_else(|| QueryError::parse(semantic, text, "out of range"))
            }
        },

        SemanticType::Duration => match raw {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.round() as i64))
                .map(TypedValue::Duration)
                .ok_or_else(|| QueryError::parse(semantic, text, "out of range")),
            _ => parse_duration(&text).map(TypedValue::Duration),
        },

        SemanticType::Boolean => parse_boolean(raw, &text).map(TypedValue::Boolean),

        SemanticType::Date | SemanticType::Datetime => {
            let (at, precision) = parse_timestamp(semantic, &text)?;
            Ok(TypedValue::Timestamp { at, precision })
        }

        SemanticType::Time => parse_time(&text).map(TypedValue::Time),

        SemanticType::DirectReference
        | SemanticType::PolymorphicReference
        | SemanticType::ReversedSingle
        | SemanticType::ReversedMany
        | SemanticType::ManyToMany
        | SemanticType::Addresses
        | SemanticType::ObfuscatedId
        | SemanticType::Roles => Ok(TypedValue::Raw(text)),
    }
}

/// JSON null, blank strings, and the literal markers `nil` / `null`.
#[must_use]
pub fn is_null_marker(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::String(s) => {
            let s = s.trim();
            s.is_empty() || s.eq_ignore_ascii_case("nil") || s.eq_ignore_ascii_case("null")
        }
        _ => false,
    }
}

/// Textual form of a raw value as the user would have typed it.
#[must_use]
pub fn value_text(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

fn numeric_chars(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_digit() || *c == '-' || *c == '.')
        .collect()
}

fn parse_integer(semantic: SemanticType, raw: &Value, text: &str) -> Result<i64, QueryError> {
    if let Value::Number(n) = raw {
        return n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| QueryError::parse(semantic, text, "out of range"));
    }
    if matches!(raw, Value::Bool(_)) {
        return Err(QueryError::parse(semantic, text, "not a number"));
    }
    parse_decimal(semantic, text)?
        .trunc()
        .to_i64()
        .ok_or_else(|| QueryError::parse(semantic, text, "out of range"))
}

fn parse_decimal(semantic: SemanticType, text: &str) -> Result<Decimal, QueryError> {
    let cleaned = numeric_chars(text);
    if cleaned.is_empty() {
        return Err(QueryError::parse(semantic, text, "not a number"));
    }
    Decimal::from_str(&cleaned).map_err(|e| QueryError::parse(semantic, text, e.to_string()))
}

fn parse_boolean(raw: &Value, text: &str) -> Result<bool, QueryError> {
    match raw {
        Value::Bool(b) => return Ok(*b),
        Value::Number(n) => return Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        _ => {}
    }
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" | "on" => Ok(true),
        "false" | "f" | "no" | "n" | "0" | "off" => Ok(false),
        _ => Err(QueryError::parse(SemanticType::Boolean, text, "not a boolean")),
    }
}

fn duration_units() -> &'static Regex {
    static UNITS: OnceLock<Regex> = OnceLock::new();
    UNITS.get_or_init(|| {
        Regex::new(
            r"(?i)(\d+(?:\.\d+)?)\s*(days|day|d|hours|hour|hrs|hr|h|minutes|minute|mins|min|m|seconds|second|secs|sec|s)",
        )
        .unwrap_or_else(|e| unreachable!("duration pattern: {e}"))
    })
}

fn duration_clock() -> &'static Regex {
    static CLOCK: OnceLock<Regex> = OnceLock::new();
    CLOCK.get_or_init(|| {
        Regex::new(r"^(\d+):(\d{1,2})(?::(\d{1,2}))?$")
            .unwrap_or_else(|e| unreachable!("clock pattern: {e}"))
    })
}

/// Seconds in a duration written as `90`, `1:30`, `1:30:15`, `1h 30m`,
/// `2 days`, `45 mins`.
pub fn parse_duration(text: &str) -> Result<i64, QueryError> {
    let trimmed = text.trim();
    let (sign, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest.trim()),
        None => (1, trimmed),
    };
    let fail = |reason: &str| QueryError::parse(SemanticType::Duration, text, reason);

    if let Ok(seconds) = Decimal::from_str(body) {
        return seconds
            .round()
            .to_i64()
            .and_then(|s| s.checked_mul(sign))
            .ok_or_else(|| fail("out of range"));
    }

    if let Some(caps) = duration_clock().captures(body) {
        let part = |i: usize| -> Result<i64, QueryError> {
            caps.get(i)
                .map_or(Ok(0), |m| m.as_str().parse::<i64>())
                .map_err(|_| fail("out of range"))
        };
        let (hours, minutes, seconds) = (part(1)?, part(2)?, part(3)?);
        return hours
            .checked_mul(3600)
            .and_then(|h| h.checked_add(minutes * 60 + seconds))
            .and_then(|s| s.checked_mul(sign))
            .ok_or_else(|| fail("out of range"));
    }

    let mut total = Decimal::ZERO;
    let mut matched = false;
    for caps in duration_units().captures_iter(body) {
        matched = true;
        let amount = Decimal::from_str(&caps[1]).map_err(|e| fail(&e.to_string()))?;
        let unit = match caps[2].to_ascii_lowercase().chars().next() {
            Some('d') => 86_400,
            Some('h') => 3_600,
            Some('m') => 60,
            _ => 1,
        };
        total = amount
            .checked_mul(Decimal::from(unit))
            .and_then(|seconds| total.checked_add(seconds))
            .ok_or_else(|| fail("out of range"))?;
    }
    if !matched {
        return Err(fail("unrecognised duration"));
    }
    total
        .round()
        .to_i64()
        .and_then(|s| s.checked_mul(sign))
        .ok_or_else(|| fail("out of range"))
}

/// Duration written as a bare whole number of seconds: no fraction, no
/// clock separator and no unit.
#[must_use]
pub fn duration_is_bare_seconds(text: &str) -> bool {
    let body = text.trim();
    let body = body.strip_prefix('-').map_or(body, str::trim);
    !body.is_empty() && body.bytes().all(|b| b.is_ascii_digit())
}

/// Format seconds the way [`parse_duration`] reads them back.
#[must_use]
pub fn format_duration(seconds: i64) -> String {
    let sign = if seconds < 0 { "-" } else { "" };
    let s = seconds.unsigned_abs();
    format!("{sign}{}h {}m {}s", s / 3600, (s % 3600) / 60, s % 60)
}

fn digit_runs() -> &'static Regex {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    DIGITS.get_or_init(|| Regex::new(r"\d+").unwrap_or_else(|e| unreachable!("digit pattern: {e}")))
}

/// Parse a date/datetime and report the precision its components imply.
///
/// Accepts year-first (`2024-03-05 10:30`) and US month-first
/// (`03/05/2024 10:30pm`) orderings.
pub fn parse_timestamp(
    semantic: SemanticType,
    text: &str,
) -> Result<(NaiveDateTime, DatePrecision), QueryError> {
    let fail = |reason: &str| QueryError::parse(semantic, text, reason);
    let parts: Vec<&str> = digit_runs().find_iter(text).map(|m| m.as_str()).collect();
    let num = |s: &str| s.parse::<u32>().map_err(|_| fail("component out of range"));

    let (year, month, day, rest) = match parts.as_slice() {
        [] => return Err(fail("no date components")),
        [y, rest @ ..] if y.len() == 4 => (
            y,
            rest.first().copied(),
            rest.get(1).copied(),
            rest.get(2..).unwrap_or_default(),
        ),
        [m, y] if y.len() == 4 => (y, Some(*m), None, &[][..]),
        [m, d, y, rest @ ..] if y.len() == 4 => (y, Some(*m), Some(*d), rest),
        _ => return Err(fail("unrecognised date order")),
    };

    let year = year.parse::<i32>().map_err(|_| fail("year out of range"))?;
    let month = month.map(num).transpose()?.unwrap_or(1);
    let day = day.map(num).transpose()?.unwrap_or(1);
    let mut hour = rest.first().copied().map(num).transpose()?.unwrap_or(0);
    let minute = rest.get(1).copied().map(num).transpose()?.unwrap_or(0);
    let second = rest.get(2).copied().map(num).transpose()?.unwrap_or(0);

    let lower = text.to_ascii_lowercase();
    if lower.contains("pm") && hour < 12 {
        hour += 12;
    } else if lower.contains("am") && hour == 12 {
        hour = 0;
    }

    let at = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| fail("invalid date"))?
        .and_hms_opt(hour, minute, second)
        .ok_or_else(|| fail("invalid time"))?;

    Ok((at, DatePrecision::from_components(parts.len())))
}

fn clock_time() -> &'static Regex {
    static TIME: OnceLock<Regex> = OnceLock::new();
    TIME.get_or_init(|| {
        Regex::new(r"(?i)^(\d{1,2})(?::?(\d{2}))?(?::(\d{2}))?\s*([ap])?\.?m?\.?$")
            .unwrap_or_else(|e| unreachable!("time pattern: {e}"))
    })
}

/// Time of day: `9`, `9:30`, `0930`, `9:30pm`, `21:05:10`, or a full
/// timestamp.
pub fn parse_time(text: &str) -> Result<NaiveTime, QueryError> {
    let fail = |reason: &str| QueryError::parse(SemanticType::Time, text, reason);
    let trimmed = text.trim();

    let runs: Vec<&str> = digit_runs().find_iter(trimmed).map(|m| m.as_str()).collect();
    if runs.len() > 1 && runs.iter().any(|run| run.len() == 4) {
        return parse_timestamp(SemanticType::Time, trimmed).map(|(at, _)| at.time());
    }

    let caps = clock_time()
        .captures(trimmed)
        .ok_or_else(|| fail("unrecognised time"))?;
    let part = |i: usize| caps.get(i).map_or(Ok(0), |m| m.as_str().parse::<u32>());
    let mut hour = part(1).map_err(|_| fail("hour out of range"))?;
    let minute = part(2).map_err(|_| fail("minute out of range"))?;
    let second = part(3).map_err(|_| fail("second out of range"))?;

    match caps.get(4).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(meridiem) if meridiem == "p" && hour < 12 => hour += 12,
        Some(meridiem) if meridiem == "a" && hour == 12 => hour = 0,
        _ => {}
    }

    NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| fail("invalid time"))
}

/// Bitmask of the named roles; `roles` lists role names in bit order.
pub fn parse_roles(roles: &[String], text: &str) -> Result<TypedValue, QueryError> {
    let mut mask = 0i64;
    let mut any = false;
    for name in text.split(|c: char| c == ',' || c.is_whitespace()).filter(|s| !s.is_empty()) {
        let bit = roles
            .iter()
            .position(|role| role.eq_ignore_ascii_case(name))
            .ok_or_else(|| QueryError::parse(SemanticType::Roles, text, format!("unknown role '{name}'")))?;
        let flag = u32::try_from(bit)
            .ok()
            .and_then(|bit| 1i64.checked_shl(bit))
            .filter(|flag| *flag > 0)
            .ok_or_else(|| QueryError::parse(SemanticType::Roles, text, format!("role '{name}' has no bit")))?;
        mask |= flag;
        any = true;
    }
    if !any {
        return Err(QueryError::parse(SemanticType::Roles, text, "no roles given"));
    }
    Ok(TypedValue::Integer(mask))
}
