//! Data layer for the map search agent (`PostgreSQL` + pgvector, `Neo4j`).
//!
//! `PostgreSQL` stores few-shot question/Cypher pairs with their embeddings
//! and answers similarity searches over them. `Neo4j` holds the map graph
//! that generated Cypher runs against. Both are reached through
//! task-scoped sessions: a unit of work opens one transaction per backend,
//! and every operation inside it picks that transaction up implicitly.
//!
//! # Architecture
//!
//! ```text
//! VectorDatabase::with_session(|| async {      GraphDatabase::with_session(mode, ..)
//!     VectorStore::<SemanticRecord>::ambient()     GraphStore::ambient()
//!         .search_by_similarity(..)                    .read(cypher, params)
//! })
//!     |                                            |
//!     +-- VECTOR_SCOPE (task-local PgSession)      +-- GRAPH_SCOPE (task-local GraphSession)
//!     +-- commit on Ok, rollback on Err/cancel     +-- commit on Ok, rollback on Err/cancel
//! ```
//!
//! # Modules
//!
//! - [`scope`] -- Task-local ambient session scopes
//! - [`postgres`] -- `PostgreSQL` pool, sessions, migrations and vector indexes
//! - [`model`] -- Generic CRUD and similarity search over vector-bearing tables
//! - [`semantic`] -- The few-shot question/Cypher record
//! - [`similarity`] -- Cosine scoring and ranking rules
//! - [`sql`] -- Identifier checks, dynamic values and filters
//! - [`graph`] -- `Neo4j` transactions over HTTP
//! - [`error`] -- Shared error types

pub mod error;
pub mod graph;
pub mod model;
pub mod postgres;
pub mod scope;
pub mod semantic;
pub mod similarity;
pub mod sql;

// Re-export primary types for convenience.
pub use error::DbError;
pub use graph::{AccessMode, GraphConfig, GraphDatabase, GraphRow, GraphSession, GraphStore};
pub use model::{SimilarityQuery, Timestamps, VectorModel, VectorStore};
pub use postgres::{HnswParams, PgSession, PostgresConfig, VectorDatabase};
pub use scope::{ScopedSession, SessionScope};
pub use semantic::SemanticRecord;
pub use sql::{Embedding, Filter, SqlValue};
