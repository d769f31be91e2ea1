//! Few-shot retrieval records.
//!
//! Each record pairs a natural-language question with the Cypher query that
//! answered it. The agent embeds an incoming question and pulls the most
//! similar past pairs as examples for query generation.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::model::{Timestamps, VectorModel};
use crate::sql::{Embedding, SqlValue};

/// Embedding width of the `query_embedding` column.
pub const EMBEDDING_DIMS: usize = 1536;

/// A question/Cypher pair in `map_db_vector_store`.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct SemanticRecord {
    /// Primary key (UUID v7, time-ordered).
    pub id: Uuid,
    /// Natural-language question. Unique.
    pub query: String,
    /// Cypher that answered the question.
    pub cypher_query: String,
    /// Embedding of `query`.
    pub query_embedding: Option<Embedding>,
    /// How often this example has been served.
    pub usage_count: i32,
    /// Curator-assigned quality score.
    pub quality_score: f64,
    /// Free-form domain tags (e.g. `billing`, `contract`).
    pub domain_tags: Vec<String>,
    /// Lifecycle timestamps.
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl SemanticRecord {
    /// New record with a fresh id and zeroed counters.
    pub fn new(
        query: impl Into<String>,
        cypher_query: impl Into<String>,
        embedding: Option<Embedding>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            query: query.into(),
            cypher_query: cypher_query.into(),
            query_embedding: embedding,
            usage_count: 0,
            quality_score: 0.0,
            domain_tags: Vec::new(),
            timestamps: Timestamps::default(),
        }
    }

    /// Set the domain tags.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.domain_tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

impl VectorModel for SemanticRecord {
    type Id = Uuid;

    const TABLE: &'static str = "map_db_vector_store";
    const VECTOR_COLUMN: &'static str = "query_embedding";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "query",
        "cypher_query",
        "query_embedding",
        "usage_count",
        "quality_score",
        "domain_tags",
    ];

    fn id(&self) -> Uuid {
        self.id
    }

    fn timestamps(&self) -> &Timestamps {
        &self.timestamps
    }

    fn values(&self) -> Vec<(&'static str, SqlValue)> {
        vec![
            ("id", self.id.into()),
            ("query", self.query.clone().into()),
            ("cypher_query", self.cypher_query.clone().into()),
            ("query_embedding", self.query_embedding.clone().into()),
            ("usage_count", self.usage_count.into()),
            ("quality_score", self.quality_score.into()),
            ("domain_tags", self.domain_tags.clone().into()),
        ]
    }
}
