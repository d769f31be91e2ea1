//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`], which wraps the underlying
//! [`sqlx`] and graph transport errors with context about which backend or
//! table the operation touched.

use mapsearch_http::RequestError;

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An operation needed an ambient session but none was in scope.
    #[error("no active {backend} session in the current task")]
    NoActiveSession {
        /// Backend whose scope was empty.
        backend: &'static str,
    },

    /// The session's transaction was already committed or rolled back.
    #[error("{backend} session is already finished")]
    SessionClosed {
        /// Backend of the finished session.
        backend: &'static str,
    },

    /// A row targeted by an update did not exist.
    #[error("no row in {table} with id {id}")]
    NotFound {
        /// Table that was searched.
        table: &'static str,
        /// Rendered primary key.
        id: String,
    },

    /// A partial update tried to change a managed column.
    #[error("column {0} cannot be set by a partial update")]
    ImmutableColumn(String),

    /// A table or column name is not a plain SQL identifier or is not part
    /// of the model.
    #[error("invalid SQL identifier: {0}")]
    InvalidIdentifier(String),

    /// An embedding was empty, non-finite, or unparseable.
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    /// The graph database HTTP endpoint could not be reached or answered
    /// with an error status.
    #[error("graph request failed: {0}")]
    Graph(#[from] RequestError),

    /// The graph database rejected a statement.
    #[error("Cypher error {code}: {message}")]
    Cypher {
        /// Neo4j status code, e.g. `Neo.ClientError.Statement.SyntaxError`.
        code: String,
        /// Server-provided message.
        message: String,
    },

    /// A write was attempted in a read-only graph session.
    #[error("write statement in a read-only graph session")]
    ReadOnlySession,

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
