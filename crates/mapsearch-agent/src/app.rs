//! Wiring of pools and clients, and the command implementations.
//!
//! One reqwest pool is built at startup and shared by every outbound
//! client (embedding service, `Neo4j`). Each command runs under a fresh
//! request id so its log lines and outbound calls can be correlated.

use std::sync::Arc;

use mapsearch_db::{
    AccessMode, GraphDatabase, GraphRow, GraphStore, SemanticRecord, VectorDatabase, VectorModel,
    VectorStore,
};
use mapsearch_http::domain::APIM_KEY_HEADER;
use mapsearch_http::{EmbeddingClient, ResilientHttpClient, with_request_id};
use serde_json::{Value, json};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AppError;

/// Connected application state.
pub struct App {
    config: AppConfig,
    http: Arc<ResilientHttpClient>,
    vector: VectorDatabase,
}

impl App {
    /// Build the shared HTTP pool and connect to `PostgreSQL`.
    pub async fn connect(config: AppConfig) -> Result<Self, AppError> {
        let pool = config.http.pool.build_client()?;
        let http = Arc::new(
            ResilientHttpClient::with_shared_pool(pool, config.http.retry.clone())
                .with_read_timeout(config.http.read_timeout),
        );
        info!(
            max_idle_per_host = config.http.pool.max_idle_per_host,
            max_attempts = config.http.retry.max_attempts(),
            strategy = %config.http.retry.strategy(),
            "HTTP pool ready"
        );

        let vector = VectorDatabase::connect(&config.database).await?;
        Ok(Self {
            config,
            http,
            vector,
        })
    }

    fn records(&self) -> VectorStore<SemanticRecord> {
        VectorStore::ambient().with_expire_days(self.config.store.expire_days)
    }

    /// Apply migrations and make sure the embedding index exists.
    pub async fn migrate(&self) -> Result<(), AppError> {
        self.vector.run_migrations().await?;
        self.vector
            .ensure_vector_index(
                SemanticRecord::TABLE,
                SemanticRecord::VECTOR_COLUMN,
                self.config.store.hnsw,
            )
            .await?;
        Ok(())
    }

    /// Delete expired records once, in its own session.
    pub async fn sweep_once(&self) -> Result<usize, AppError> {
        let store = self.records();
        let deleted = with_request_id(
            Uuid::now_v7().to_string(),
            self.vector
                .with_session(|| async { store.bulk_delete_expired().await }),
        )
        .await?;
        Ok(deleted.len())
    }

    /// Sweep on every interval tick until Ctrl-C.
    ///
    /// A failed sweep is logged and retried on the next tick.
    pub async fn sweep(&self) -> Result<(), AppError> {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            "expiry sweeper started"
        );
        loop {
            tokio::select! {
                signal = &mut shutdown => {
                    if let Err(e) = signal {
                        warn!(error = %e, "failed to listen for shutdown signal");
                    }
                    info!("shutdown requested, stopping sweeper");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(deleted) => info!(deleted, "sweep complete"),
                        Err(e) => warn!(error = %e, "sweep failed"),
                    }
                }
            }
        }
    }

    /// Embed `text` and return the most similar stored examples.
    pub async fn search(
        &self,
        text: &str,
        limit: Option<usize>,
        cutoff: Option<f64>,
    ) -> Result<Vec<Value>, AppError> {
        let settings = &self.config.embedding;
        let base_url = settings
            .base_url
            .as_deref()
            .ok_or(AppError::NotConfigured {
                command: "search",
                variable: "EMBEDDING_BASE_URL",
            })?;
        let mut client = EmbeddingClient::new(base_url, Arc::clone(&self.http))
            .with_model(settings.model.clone())
            .with_service_code(settings.service_code.clone());
        if let Some(key) = &settings.api_key {
            client = client.with_api_key(APIM_KEY_HEADER, key)?;
        }

        let mut query = self.config.store.search.clone();
        if let Some(limit) = limit {
            query = query.with_limit(limit);
        }
        if let Some(cutoff) = cutoff {
            query = query.with_cutoff(cutoff);
        }
        let store = self.records();

        let hits = with_request_id(Uuid::now_v7().to_string(), async {
            let embedding = client.embed(text).await?;
            let hits = self
                .vector
                .with_session(|| async { store.search_by_similarity(&embedding, &query).await })
                .await?;
            Ok::<_, AppError>(hits)
        })
        .await?;

        info!(hits = hits.len(), model = client.model(), "few-shot search complete");
        Ok(hits
            .into_iter()
            .map(|(record, score)| {
                json!({
                    "id": record.id,
                    "query": record.query,
                    "cypher_query": record.cypher_query,
                    "domain_tags": record.domain_tags,
                    "score": score,
                })
            })
            .collect())
    }

    /// Run a read-only Cypher statement with JSON `params`.
    pub async fn cypher(&self, statement: &str, params: &str) -> Result<Vec<GraphRow>, AppError> {
        let config = self.config.graph.as_ref().ok_or(AppError::NotConfigured {
            command: "cypher",
            variable: "NEO4J_HTTP_URL",
        })?;
        let params: Value = serde_json::from_str(params)?;
        let graph = GraphDatabase::new(config, Arc::clone(&self.http))?;

        let rows = with_request_id(
            Uuid::now_v7().to_string(),
            graph.with_session(AccessMode::Read, move || async move {
                GraphStore::ambient().read(statement, params).await
            }),
        )
        .await?;
        Ok(rows)
    }

    /// Close the database pool and drop pooled HTTP connections.
    pub async fn close(&self) {
        self.vector.close().await;
        self.http.close();
        info!(app = self.config.app_name, "shut down");
    }
}
