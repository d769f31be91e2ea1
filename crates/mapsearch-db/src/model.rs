//! Generic persistence for vector-store entities.
//!
//! A concrete entity implements [`VectorModel`] to name its table, columns
//! and vector column; [`VectorStore`] then provides the shared operations.
//! Every operation runs on the explicit session the store was built with,
//! or else on the ambient [`VECTOR_SCOPE`] session, and none of them
//! commits.
//!
//! Timestamp rules:
//!
//! | Operation        | `created_at` | `updated_at` | `expire_at`                         |
//! |------------------|--------------|--------------|-------------------------------------|
//! | `insert`         | now          | now          | given, else now + expire days       |
//! | `upsert` (new)   | now          | now          | given, else now + expire days       |
//! | `upsert` (exists)| kept         | now          | given, else now + expire days       |
//! | `update_partial` | kept         | now          | only when supplied                  |

use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Postgres, QueryBuilder, Row};

use crate::error::DbError;
use crate::postgres::{PgSession, VECTOR_SCOPE};
use crate::similarity::{DEFAULT_SEARCH_LIMIT, DEFAULT_SIMILARITY_CUTOFF, best_per_key, rank};
use crate::sql::{Embedding, Filter, SqlValue, ident, push_filters};

/// Default number of days before a row expires.
pub const DEFAULT_EXPIRE_DAYS: i64 = 30;

const CREATED_AT: &str = "created_at";
const UPDATED_AT: &str = "updated_at";
const EXPIRE_AT: &str = "expire_at";

/// Lifecycle timestamps shared by every vector-store entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Timestamps {
    /// Set on first insert, never changed afterwards.
    pub created_at: Option<DateTime<Utc>>,
    /// Refreshed by every write.
    pub updated_at: Option<DateTime<Utc>>,
    /// When the sweeper may delete the row.
    pub expire_at: Option<DateTime<Utc>>,
}

/// A row type stored in a pgvector table.
pub trait VectorModel: for<'r> FromRow<'r, PgRow> + Send + Sync + Unpin + 'static {
    /// Primary key type.
    type Id: Ord
        + Clone
        + Display
        + Send
        + Sync
        + Unpin
        + Into<SqlValue>
        + for<'r> sqlx::Decode<'r, Postgres>
        + sqlx::Type<Postgres>;

    /// Table name.
    const TABLE: &'static str;

    /// Primary key column.
    const ID_COLUMN: &'static str = "id";

    /// Column holding the embedding.
    const VECTOR_COLUMN: &'static str = "embedding";

    /// Days until a newly written row expires.
    const EXPIRE_DAYS: i64 = DEFAULT_EXPIRE_DAYS;

    /// Entity columns in select order, excluding the timestamps.
    const COLUMNS: &'static [&'static str];

    /// Primary key of this row.
    fn id(&self) -> Self::Id;

    /// Lifecycle timestamps.
    fn timestamps(&self) -> &Timestamps;

    /// Entity column values to write, excluding the timestamps. Omit
    /// columns the database assigns.
    fn values(&self) -> Vec<(&'static str, SqlValue)>;
}

/// Parameters of a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityQuery {
    /// Maximum number of hits.
    pub limit: usize,
    /// Minimum score for a hit.
    pub cutoff: f64,
    /// Equality filters applied before scoring.
    pub filters: Vec<Filter>,
}

impl Default for SimilarityQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SEARCH_LIMIT,
            cutoff: DEFAULT_SIMILARITY_CUTOFF,
            filters: Vec::new(),
        }
    }
}

impl SimilarityQuery {
    /// Set the hit limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Set the score cutoff.
    #[must_use]
    pub const fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Add an equality filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// Persistence operations for model `M`.
pub struct VectorStore<M> {
    session: Option<Arc<PgSession>>,
    expire_days: i64,
    _model: PhantomData<fn() -> M>,
}

impl<M: VectorModel> Default for VectorStore<M> {
    fn default() -> Self {
        Self::ambient()
    }
}

impl<M: VectorModel> VectorStore<M> {
    /// Store using the ambient session of each calling task.
    pub const fn ambient() -> Self {
        Self {
            session: None,
            expire_days: M::EXPIRE_DAYS,
            _model: PhantomData,
        }
    }

    /// Store bound to `session`, ignoring any ambient session.
    pub const fn with_session(session: Arc<PgSession>) -> Self {
        Self {
            session: Some(session),
            expire_days: M::EXPIRE_DAYS,
            _model: PhantomData,
        }
    }

    /// Override the model's expiry period.
    #[must_use]
    pub const fn with_expire_days(mut self, days: i64) -> Self {
        self.expire_days = days;
        self
    }

    /// Expiry period applied to writes.
    pub const fn expire_days(&self) -> i64 {
        self.expire_days
    }

    fn session(&self) -> Result<Arc<PgSession>, DbError> {
        VECTOR_SCOPE.resolve(self.session.as_ref())
    }

    fn default_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        TimeDelta::try_days(self.expire_days).and_then(|days| now.checked_add_signed(days))
    }

    /// Fetch one row by primary key.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoActiveSession`] outside a scope, or
    /// [`DbError::Postgres`] if the query fails.
    pub async fn get(&self, id: &M::Id) -> Result<Option<M>, DbError> {
        let session = self.session()?;
        let mut qb = select_by_id::<M>(id.clone())?;
        let mut conn = session.connection().await?;
        let row = qb.build_query_as::<M>().fetch_optional(&mut *conn).await?;
        Ok(row)
    }

    /// Insert `entity` and return the stored row.
    ///
    /// Sets `created_at` and `updated_at` to now and defaults `expire_at`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoActiveSession`] outside a scope, or
    /// [`DbError::Postgres`] if the insert fails.
    pub async fn insert(&self, entity: &M) -> Result<M, DbError> {
        let session = self.session()?;
        let now = Utc::now();
        let values = self.write_values(entity, now);
        let mut qb = insert_sql::<M>(values, None)?;
        let mut conn = session.connection().await?;
        let row = qb.build_query_as::<M>().fetch_one(&mut *conn).await?;
        tracing::debug!(table = M::TABLE, id = %row.id(), "inserted row");
        Ok(row)
    }

    /// Insert `entity`, or update the existing row with the same id.
    ///
    /// The update path never changes the id or `created_at`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidIdentifier`] if the entity's values lack
    /// the id column, [`DbError::NoActiveSession`] outside a scope, or
    /// [`DbError::Postgres`] if the statement fails.
    pub async fn upsert(&self, entity: &M) -> Result<M, DbError> {
        let session = self.session()?;
        let now = Utc::now();
        let values = self.write_values(entity, now);
        if !values.iter().any(|(column, _)| *column == M::ID_COLUMN) {
            return Err(DbError::InvalidIdentifier(format!(
                "upsert into {} requires a value for {}",
                M::TABLE,
                M::ID_COLUMN
            )));
        }
        let mut qb = insert_sql::<M>(values, Some(M::ID_COLUMN))?;
        let mut conn = session.connection().await?;
        let row = qb.build_query_as::<M>().fetch_one(&mut *conn).await?;
        tracing::debug!(table = M::TABLE, id = %row.id(), "upserted row");
        Ok(row)
    }

    /// Set `values` on the row `id` and refresh `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ImmutableColumn`] for the id or a managed
    /// timestamp, [`DbError::InvalidIdentifier`] for a column the model
    /// does not have, [`DbError::NotFound`] if no row has `id`, or
    /// [`DbError::Postgres`] if the update fails.
    pub async fn update_partial(
        &self,
        id: &M::Id,
        values: Vec<(&str, SqlValue)>,
    ) -> Result<(), DbError> {
        let session = self.session()?;
        let mut qb = update_sql::<M>(id.clone(), values, Utc::now())?;
        let mut conn = session.connection().await?;
        let result = qb.build().execute(&mut *conn).await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound {
                table: M::TABLE,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Delete the row `id`, returning it if it existed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoActiveSession`] outside a scope, or
    /// [`DbError::Postgres`] if the delete fails.
    pub async fn delete(&self, id: &M::Id) -> Result<Option<M>, DbError> {
        let session = self.session()?;
        let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM ");
        qb.push(ident(M::TABLE)?)
            .push(" WHERE ")
            .push(ident(M::ID_COLUMN)?)
            .push(" = ");
        let key: SqlValue = id.clone().into();
        key.push_to(&mut qb);
        qb.push(" RETURNING ").push(select_list::<M>()?);
        let mut conn = session.connection().await?;
        let row = qb.build_query_as::<M>().fetch_optional(&mut *conn).await?;
        Ok(row)
    }

    /// Delete every row whose `expire_at` has passed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoActiveSession`] outside a scope, or
    /// [`DbError::Postgres`] if the delete fails.
    pub async fn bulk_delete_expired(&self) -> Result<Vec<M::Id>, DbError> {
        let session = self.session()?;
        let sql = format!(
            "DELETE FROM {} WHERE {EXPIRE_AT} < now() RETURNING {}",
            ident(M::TABLE)?,
            ident(M::ID_COLUMN)?
        );
        let mut conn = session.connection().await?;
        let ids: Vec<M::Id> = sqlx::query_scalar(&sql).fetch_all(&mut *conn).await?;
        tracing::info!(table = M::TABLE, deleted = ids.len(), "deleted expired rows");
        Ok(ids)
    }

    /// Rows matching all `filters`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidIdentifier`] for a malformed filter
    /// column, or [`DbError::Postgres`] if the query fails.
    pub async fn list(&self, filters: &[Filter]) -> Result<Vec<M>, DbError> {
        let session = self.session()?;
        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        qb.push(select_list::<M>()?)
            .push(" FROM ")
            .push(ident(M::TABLE)?)
            .push(" WHERE TRUE");
        push_filters(&mut qb, filters)?;
        qb.push(" ORDER BY ").push(ident(M::ID_COLUMN)?);
        let mut conn = session.connection().await?;
        let rows = qb.build_query_as::<M>().fetch_all(&mut *conn).await?;
        Ok(rows)
    }

    /// Whether any row matches all `filters`.
    ///
    /// # Errors
    ///
    /// As [`Self::list`].
    pub async fn exists(&self, filters: &[Filter]) -> Result<bool, DbError> {
        let session = self.session()?;
        let mut qb = QueryBuilder::<Postgres>::new("SELECT EXISTS (SELECT 1 FROM ");
        qb.push(ident(M::TABLE)?).push(" WHERE TRUE");
        push_filters(&mut qb, filters)?;
        qb.push(")");
        let mut conn = session.connection().await?;
        let exists: bool = qb.build_query_scalar().fetch_one(&mut *conn).await?;
        Ok(exists)
    }

    /// Number of rows matching all `filters`.
    ///
    /// # Errors
    ///
    /// As [`Self::list`].
    pub async fn count(&self, filters: &[Filter]) -> Result<i64, DbError> {
        let session = self.session()?;
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM ");
        qb.push(ident(M::TABLE)?).push(" WHERE TRUE");
        push_filters(&mut qb, filters)?;
        let mut conn = session.connection().await?;
        let count: i64 = qb.build_query_scalar().fetch_one(&mut *conn).await?;
        Ok(count)
    }

    /// Rows most similar to `embedding`, with their scores.
    ///
    /// Only rows with a stored vector matching all filters are scored.
    /// Hits scoring below the cutoff are dropped; the rest are ordered by
    /// descending score, then ascending id, and truncated to the limit.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidEmbedding`] for an empty, non-finite or
    /// zero-norm embedding, or [`DbError::Postgres`] if the query fails.
    pub async fn search_by_similarity(
        &self,
        embedding: &[f32],
        query: &SimilarityQuery,
    ) -> Result<Vec<(M, f64)>, DbError> {
        let session = self.session()?;
        let mut qb = similarity_sql::<M>(embedding, query)?;
        let mut conn = session.connection().await?;
        let rows = qb.build().fetch_all(&mut *conn).await?;
        drop(conn);

        rows.iter()
            .map(|row| -> Result<(M, f64), DbError> {
                Ok((M::from_row(row)?, row.try_get::<f64, _>("score")?))
            })
            .collect()
    }

    /// Similarity search over several query embeddings at once.
    ///
    /// Each row keeps its best score across the queries; the merged hits
    /// are ranked with the same cutoff, order and limit as
    /// [`Self::search_by_similarity`].
    ///
    /// # Errors
    ///
    /// As [`Self::search_by_similarity`], for any of the embeddings.
    pub async fn search_by_vectors(
        &self,
        embeddings: &[Vec<f32>],
        query: &SimilarityQuery,
    ) -> Result<Vec<(M, f64)>, DbError> {
        let mut hits = Vec::new();
        for embedding in embeddings {
            hits.extend(self.search_by_similarity(embedding, query).await?);
        }
        let merged = best_per_key(hits, M::id);
        Ok(rank(merged, M::id, query.cutoff, query.limit))
    }

    /// Entity values plus the three managed timestamps.
    fn write_values(&self, entity: &M, now: DateTime<Utc>) -> Vec<(&'static str, SqlValue)> {
        let mut values = entity.values();
        let expire_at = entity
            .timestamps()
            .expire_at
            .or_else(|| self.default_expiry(now));
        values.push((CREATED_AT, SqlValue::Timestamp(now)));
        values.push((UPDATED_AT, SqlValue::Timestamp(now)));
        values.push((EXPIRE_AT, expire_at.into()));
        values
    }
}

/// Projection of every model column, the vector column as pgvector text.
fn select_list<M: VectorModel>() -> Result<String, DbError> {
    let mut columns = Vec::with_capacity(M::COLUMNS.len().saturating_add(3));
    for &column in M::COLUMNS {
        let column = ident(column)?;
        if column == M::VECTOR_COLUMN {
            columns.push(format!("{column}::text AS {column}"));
        } else {
            columns.push(column.to_owned());
        }
    }
    columns.extend([CREATED_AT, UPDATED_AT, EXPIRE_AT].map(str::to_owned));
    Ok(columns.join(", "))
}

fn select_by_id<M: VectorModel>(id: M::Id) -> Result<QueryBuilder<'static, Postgres>, DbError> {
    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(select_list::<M>()?)
        .push(" FROM ")
        .push(ident(M::TABLE)?)
        .push(" WHERE ")
        .push(ident(M::ID_COLUMN)?)
        .push(" = ");
    let key: SqlValue = id.into();
    key.push_to(&mut qb);
    Ok(qb)
}

/// `INSERT ... RETURNING`, with `ON CONFLICT (key) DO UPDATE` when `conflict`
/// is given. The update sets every written column except the key and
/// `created_at`.
fn insert_sql<M: VectorModel>(
    values: Vec<(&'static str, SqlValue)>,
    conflict: Option<&str>,
) -> Result<QueryBuilder<'static, Postgres>, DbError> {
    let columns = values
        .iter()
        .map(|(column, _)| ident(column))
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");

    let mut qb = QueryBuilder::new("INSERT INTO ");
    qb.push(ident(M::TABLE)?)
        .push(" (")
        .push(&columns)
        .push(") VALUES (");
    let mut updated = Vec::new();
    for (i, (column, value)) in values.into_iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        value.push_to(&mut qb);
        if conflict.is_some_and(|key| key != column) && column != CREATED_AT {
            updated.push(format!("{column} = EXCLUDED.{column}"));
        }
    }
    qb.push(")");
    if let Some(key) = conflict {
        qb.push(" ON CONFLICT (")
            .push(ident(key)?)
            .push(") DO UPDATE SET ")
            .push(updated.join(", "));
    }
    qb.push(" RETURNING ").push(select_list::<M>()?);
    Ok(qb)
}

fn update_sql<M: VectorModel>(
    id: M::Id,
    values: Vec<(&str, SqlValue)>,
    now: DateTime<Utc>,
) -> Result<QueryBuilder<'static, Postgres>, DbError> {
    let mut qb = QueryBuilder::new("UPDATE ");
    qb.push(ident(M::TABLE)?).push(" SET ");
    for (column, value) in values {
        if column == M::ID_COLUMN || column == CREATED_AT || column == UPDATED_AT {
            return Err(DbError::ImmutableColumn(column.to_owned()));
        }
        if column != EXPIRE_AT && !M::COLUMNS.contains(&column) {
            return Err(DbError::InvalidIdentifier(format!(
                "{column} is not a column of {}",
                M::TABLE
            )));
        }
        qb.push(ident(column)?).push(" = ");
        value.push_to(&mut qb);
        qb.push(", ");
    }
    qb.push(UPDATED_AT).push(" = ");
    SqlValue::Timestamp(now).push_to(&mut qb);
    qb.push(" WHERE ").push(ident(M::ID_COLUMN)?).push(" = ");
    let key: SqlValue = id.into();
    key.push_to(&mut qb);
    Ok(qb)
}

fn similarity_sql<M: VectorModel>(
    embedding: &[f32],
    query: &SimilarityQuery,
) -> Result<QueryBuilder<'static, Postgres>, DbError> {
    Embedding::validate(embedding)?;
    let table = ident(M::TABLE)?;
    let vector = ident(M::VECTOR_COLUMN)?;
    let id = ident(M::ID_COLUMN)?;
    let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);

    let mut qb = QueryBuilder::new("SELECT * FROM (SELECT ");
    qb.push(select_list::<M>()?)
        .push(", 1 - (")
        .push(vector)
        .push(" <=> ");
    SqlValue::Vector(Embedding(embedding.to_vec())).push_to(&mut qb);
    qb.push(")::float8 AS score FROM ")
        .push(table)
        .push(" WHERE ")
        .push(vector)
        .push(" IS NOT NULL");
    push_filters(&mut qb, &query.filters)?;
    qb.push(") AS scored WHERE score <> 'NaN'::float8 AND score >= ")
        .push_bind(query.cutoff)
        .push(" ORDER BY score DESC, ")
        .push(id)
        .push(" ASC LIMIT ")
        .push_bind(limit);
    Ok(qb)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[derive(Debug, FromRow)]
    struct Doc {
        id: Uuid,
        body: String,
        embedding: Option<Embedding>,
        #[sqlx(flatten)]
        timestamps: Timestamps,
    }

    impl VectorModel for Doc {
        type Id = Uuid;
        const TABLE: &'static str = "docs";
        const COLUMNS: &'static [&'static str] = &["id", "body", "embedding"];

        fn id(&self) -> Uuid {
            self.id
        }

        fn timestamps(&self) -> &Timestamps {
            &self.timestamps
        }

        fn values(&self) -> Vec<(&'static str, SqlValue)> {
            vec![
                ("id", self.id.into()),
                ("body", self.body.clone().into()),
                ("embedding", self.embedding.clone().into()),
            ]
        }
    }

    #[test]
    fn select_list_casts_vector_column() {
        assert_eq!(
            select_list::<Doc>().ok().as_deref(),
            Some("id, body, embedding::text AS embedding, created_at, updated_at, expire_at")
        );
    }

    #[test]
    fn upsert_never_updates_id_or_created_at() {
        let values = vec![
            ("id", SqlValue::Uuid(Uuid::nil())),
            ("body", SqlValue::from("x")),
            (CREATED_AT, SqlValue::Timestamp(Utc::now())),
            (UPDATED_AT, SqlValue::Timestamp(Utc::now())),
            (EXPIRE_AT, SqlValue::Null),
        ];
        let qb = insert_sql::<Doc>(values, Some("id"));
        let sql = qb.map(|qb| qb.sql().to_owned()).ok();
        assert_eq!(
            sql.as_deref(),
            Some(
                "INSERT INTO docs (id, body, created_at, updated_at, expire_at) \
                 VALUES ($1, $2, $3, $4, NULL) \
                 ON CONFLICT (id) DO UPDATE SET body = EXCLUDED.body, \
                 updated_at = EXCLUDED.updated_at, expire_at = EXCLUDED.expire_at \
                 RETURNING id, body, embedding::text AS embedding, created_at, updated_at, expire_at"
            )
        );
    }

    #[test]
    fn plain_insert_has_no_conflict_clause() {
        let values = vec![("body", SqlValue::from("x"))];
        let sql = insert_sql::<Doc>(values, None).map(|qb| qb.sql().to_owned());
        assert!(sql.is_ok_and(|s| !s.contains("ON CONFLICT")));
    }

    #[test]
    fn partial_update_refreshes_updated_at() {
        let sql = update_sql::<Doc>(Uuid::nil(), vec![("body", "y".into())], Utc::now())
            .map(|qb| qb.sql().to_owned())
            .ok();
        assert_eq!(
            sql.as_deref(),
            Some("UPDATE docs SET body = $1, updated_at = $2 WHERE id = $3")
        );
    }

    #[test]
    fn partial_update_rejects_managed_and_unknown_columns() {
        for column in ["id", "created_at", "updated_at"] {
            let result = update_sql::<Doc>(Uuid::nil(), vec![(column, SqlValue::Null)], Utc::now());
            assert!(matches!(result, Err(DbError::ImmutableColumn(_))), "{column}");
        }
        let result = update_sql::<Doc>(Uuid::nil(), vec![("nope", SqlValue::Null)], Utc::now());
        assert!(matches!(result, Err(DbError::InvalidIdentifier(_))));

        let result = update_sql::<Doc>(Uuid::nil(), vec![(EXPIRE_AT, SqlValue::Null)], Utc::now());
        assert!(result.is_ok());
    }

    #[test]
    fn similarity_query_shape() {
        let query = SimilarityQuery::default()
            .with_limit(5)
            .with_cutoff(0.5)
            .with_filter(Filter::eq("body", "plan"));
        let sql = similarity_sql::<Doc>(&[0.1, 0.2], &query)
            .map(|qb| qb.sql().to_owned())
            .ok();
        assert_eq!(
            sql.as_deref(),
            Some(
                "SELECT * FROM (SELECT id, body, embedding::text AS embedding, created_at, \
                 updated_at, expire_at, 1 - (embedding <=> CAST($1 AS vector))::float8 AS score \
                 FROM docs WHERE embedding IS NOT NULL AND body = $2) AS scored \
                 WHERE score <> 'NaN'::float8 AND score >= $3 ORDER BY score DESC, id ASC LIMIT $4"
            )
        );
    }

    #[test]
    fn similarity_rejects_bad_embeddings() {
        let query = SimilarityQuery::default();
        assert!(matches!(
            similarity_sql::<Doc>(&[], &query),
            Err(DbError::InvalidEmbedding(_))
        ));
        assert!(matches!(
            similarity_sql::<Doc>(&[f32::INFINITY], &query),
            Err(DbError::InvalidEmbedding(_))
        ));
        assert!(matches!(
            similarity_sql::<Doc>(&[0.0, 0.0], &query),
            Err(DbError::InvalidEmbedding(_))
        ));
    }

    #[test]
    fn expiry_defaults_from_expire_days() {
        let store = VectorStore::<Doc>::ambient().with_expire_days(7);
        let now = Utc::now();
        assert_eq!(
            store.default_expiry(now),
            now.checked_add_signed(TimeDelta::days(7))
        );
        assert_eq!(VectorStore::<Doc>::ambient().expire_days(), DEFAULT_EXPIRE_DAYS);
    }

    #[tokio::test]
    async fn operations_outside_a_scope_fail_fast() {
        let store = VectorStore::<Doc>::ambient();
        let result = store.get(&Uuid::nil()).await;
        assert!(matches!(
            result,
            Err(DbError::NoActiveSession { backend: "postgres" })
        ));
    }
}
