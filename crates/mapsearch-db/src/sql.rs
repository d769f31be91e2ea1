//! Dynamic SQL pieces shared by the model operations.
//!
//! Table and column names cannot be bound as parameters, so every name is
//! checked by [`ident`] before it is spliced into a statement. Values are
//! always bound.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, QueryBuilder, Type};
use uuid::Uuid;

use crate::error::DbError;
use crate::similarity::magnitude;

/// Validate a plain or schema-qualified SQL identifier.
///
/// Each dot-separated part must start with an ASCII letter or `_` and
/// contain only ASCII alphanumerics and `_`.
///
/// # Errors
///
/// Returns [`DbError::InvalidIdentifier`] otherwise.
pub fn ident(name: &str) -> Result<&str, DbError> {
    let valid = !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(name)
    } else {
        Err(DbError::InvalidIdentifier(name.to_owned()))
    }
}

/// A pgvector embedding.
///
/// Travels as pgvector's text form (`[0.1,0.2,...]`): written with
/// `CAST($n AS vector)` and read back through a `::text` projection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// Check the embedding is non-empty, finite and not all zeros.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidEmbedding`] otherwise.
    pub fn validate(values: &[f32]) -> Result<(), DbError> {
        if values.is_empty() {
            return Err(DbError::InvalidEmbedding("embedding is empty".to_owned()));
        }
        if let Some(position) = values.iter().position(|v| !v.is_finite()) {
            return Err(DbError::InvalidEmbedding(format!(
                "component {position} is not finite"
            )));
        }
        if magnitude(values) <= 0.0 {
            return Err(DbError::InvalidEmbedding("embedding has zero norm".to_owned()));
        }
        Ok(())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

impl fmt::Display for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str("]")
    }
}

impl FromStr for Embedding {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .trim()
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| DbError::InvalidEmbedding(format!("not a vector literal: {s}")))?;
        if inner.trim().is_empty() {
            return Ok(Self(Vec::new()));
        }
        inner
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f32>()
                    .map_err(|e| DbError::InvalidEmbedding(format!("{part:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl Type<Postgres> for Embedding {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for Embedding {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let text = <&str as Decode<Postgres>>::decode(value)?;
        Ok(text.parse()?)
    }
}

impl Encode<'_, Postgres> for Embedding {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <String as Encode<Postgres>>::encode(self.to_string(), buf)
    }
}

/// A dynamically typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// `boolean`.
    Bool(bool),
    /// `integer`.
    Int(i32),
    /// `bigint`.
    BigInt(i64),
    /// `double precision`.
    Float(f64),
    /// `text`.
    Text(String),
    /// `text[]`.
    TextArray(Vec<String>),
    /// `uuid`.
    Uuid(Uuid),
    /// `timestamptz`.
    Timestamp(DateTime<Utc>),
    /// `jsonb`.
    Json(serde_json::Value),
    /// `vector`.
    Vector(Embedding),
}

impl SqlValue {
    /// Append this value to `qb` as a bind parameter (or literal `NULL`).
    pub fn push_to(self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Self::Null => qb.push("NULL"),
            Self::Bool(v) => qb.push_bind(v),
            Self::Int(v) => qb.push_bind(v),
            Self::BigInt(v) => qb.push_bind(v),
            Self::Float(v) => qb.push_bind(v),
            Self::Text(v) => qb.push_bind(v),
            Self::TextArray(v) => qb.push_bind(v),
            Self::Uuid(v) => qb.push_bind(v),
            Self::Timestamp(v) => qb.push_bind(v),
            Self::Json(v) => qb.push_bind(sqlx::types::Json(v)),
            Self::Vector(v) => qb.push("CAST(").push_bind(v).push(" AS vector)"),
        };
    }

    /// Whether this is SQL `NULL`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

macro_rules! sql_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

sql_value_from! {
    bool => Bool,
    i32 => Int,
    i64 => BigInt,
    f64 => Float,
    String => Text,
    Vec<String> => TextArray,
    Uuid => Uuid,
    DateTime<Utc> => Timestamp,
    serde_json::Value => Json,
    Embedding => Vector,
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl<T: Into<Self>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Equality condition on one column. A `NULL` value matches `IS NULL`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    column: String,
    value: SqlValue,
}

impl Filter {
    /// `column = value`.
    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Filtered column.
    pub fn column(&self) -> &str {
        &self.column
    }
}

/// Append ` AND col = $n ...` for each filter.
///
/// # Errors
///
/// Returns [`DbError::InvalidIdentifier`] for a malformed column name.
pub fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filters: &[Filter]) -> Result<(), DbError> {
    for filter in filters {
        qb.push(" AND ").push(ident(&filter.column)?);
        if filter.value.is_null() {
            qb.push(" IS NULL");
        } else {
            qb.push(" = ");
            filter.value.clone().push_to(qb);
        }
    }
    Ok(())
}
