//! Configuration for the agent binary.
//!
//! Everything is read from environment variables. Only `DATABASE_URL` is
//! required; the embedding service and `Neo4j` are optional and the
//! commands that need them fail with a clear error when they are absent.

#[cfg(test)]
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use mapsearch_db::{GraphConfig, HnswParams, PostgresConfig, SimilarityQuery};
use mapsearch_http::embedding::{DEFAULT_EMBEDDING_MODEL, DEFAULT_SERVICE_CODE};
use mapsearch_http::{BackoffPolicy, JitterStrategy, PolicyError, PoolConfig};

/// A missing or malformed environment variable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    #[error("missing required env var {name}")]
    Missing {
        /// Variable name.
        name: &'static str,
    },

    /// A variable could not be parsed or is out of range.
    #[error("invalid {name}={value:?}: {reason}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Outbound HTTP settings shared by every service client.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Connection pool sizing.
    pub pool: PoolConfig,
    /// Per-attempt read deadline.
    pub read_timeout: Duration,
    /// Retry policy.
    pub retry: BackoffPolicy,
}

/// Embedding service settings.
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    /// Service base URL. `None` disables the `search` command.
    pub base_url: Option<String>,
    /// `x-apim-key` value.
    pub api_key: Option<String>,
    /// Embedding model name.
    pub model: String,
    /// Caller identification sent with each request.
    pub service_code: String,
}

/// Vector store tuning.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Days until a written row expires.
    pub expire_days: i64,
    /// Similarity search limit and cutoff.
    pub search: SimilarityQuery,
    /// HNSW index parameters used by `migrate`.
    pub hnsw: HnswParams,
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Service name used in logs.
    pub app_name: String,
    /// Outbound HTTP settings.
    pub http: HttpSettings,
    /// Embedding service settings.
    pub embedding: EmbeddingSettings,
    /// `PostgreSQL` pool settings.
    pub database: PostgresConfig,
    /// `Neo4j` settings, when `NEO4J_HTTP_URL` is set.
    pub graph: Option<GraphConfig>,
    /// Vector store tuning.
    pub store: StoreSettings,
    /// Pause between expiry sweeps.
    pub sweep_interval: Duration,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from a map of variables.
    #[cfg(test)]
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| vars.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };

        let retry = BackoffPolicy::new(
            env.parse("RETRY_MAX_ATTEMPTS", 2)?,
            Duration::from_millis(env.parse("RETRY_BASE_MS", 100)?),
            Duration::from_millis(env.parse("RETRY_CAP_MS", 200)?),
        )
        .map_err(|e| {
            let name = match e {
                PolicyError::ZeroBase => "RETRY_BASE_MS",
                _ => "RETRY_CAP_MS",
            };
            env.invalid(name, e)
        })?
        .with_strategy(env.parse("RETRY_STRATEGY", JitterStrategy::Full)?)
        .with_retryable_status_codes(env.list::<u16>("RETRY_ON_STATUS")?)
        .with_retry_on_read_timeout(env.parse("RETRY_ON_READ_TIMEOUT", false)?);

        let http = HttpSettings {
            pool: PoolConfig {
                max_idle_per_host: env.parse("HTTP_MAX_IDLE_PER_HOST", 20)?,
                idle_timeout: Duration::from_secs(env.parse("HTTP_IDLE_TIMEOUT_SECS", 90)?),
                connect_timeout: Duration::from_millis(env.parse("HTTP_CONNECT_TIMEOUT_MS", 1000)?),
            },
            read_timeout: Duration::from_millis(env.parse("HTTP_READ_TIMEOUT_MS", 3000)?),
            retry,
        };

        let embedding = EmbeddingSettings {
            base_url: env.get("EMBEDDING_BASE_URL"),
            api_key: env.get("EMBEDDING_API_KEY"),
            model: env
                .get("EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_owned()),
            service_code: env
                .get("EMBEDDING_SERVICE_CODE")
                .unwrap_or_else(|| DEFAULT_SERVICE_CODE.to_owned()),
        };

        let database = PostgresConfig::new(&env.required("DATABASE_URL")?)
            .with_max_connections(env.parse("DATABASE_MAX_CONNECTIONS", 10)?)
            .with_connect_timeout(Duration::from_secs(
                env.parse("DATABASE_CONNECT_TIMEOUT_SECS", 5)?,
            ))
            .with_idle_timeout(Duration::from_secs(env.parse("DATABASE_IDLE_TIMEOUT_SECS", 300)?))
            .with_max_lifetime(Duration::from_secs(
                env.parse("DATABASE_MAX_LIFETIME_SECS", 1800)?,
            ))
            .with_test_before_acquire(env.parse("DATABASE_TEST_BEFORE_ACQUIRE", true)?);

        let graph = env.get("NEO4J_HTTP_URL").map(|url| {
            let mut config = GraphConfig::new(&url);
            if let Some(database) = env.get("NEO4J_DATABASE") {
                config = config.with_database(&database);
            }
            if let Some(username) = env.get("NEO4J_USERNAME") {
                let password = env.get("NEO4J_PASSWORD").unwrap_or_default();
                config = config.with_credentials(&username, &password);
            }
            config
        });

        let expire_days: i64 = env.parse("EXPIRE_DAYS", 30)?;
        if expire_days <= 0 {
            return Err(env.invalid("EXPIRE_DAYS", "must be positive"));
        }
        let cutoff: f64 = env.parse("VECTOR_SEARCH_CUTOFF", 0.3)?;
        if !cutoff.is_finite() {
            return Err(env.invalid("VECTOR_SEARCH_CUTOFF", "must be finite"));
        }
        let store = StoreSettings {
            expire_days,
            search: SimilarityQuery::default()
                .with_limit(env.parse("VECTOR_SEARCH_LIMIT", 3)?)
                .with_cutoff(cutoff),
            hnsw: HnswParams {
                m: env.parse("HNSW_M", 16)?,
                ef_construction: env.parse("HNSW_EF_CONSTRUCTION", 64)?,
            },
        };

        let sweep_secs: u64 = env.parse("SWEEP_INTERVAL_SECS", 3600)?;
        if sweep_secs == 0 {
            return Err(env.invalid("SWEEP_INTERVAL_SECS", "must be positive"));
        }

        Ok(Self {
            app_name: env
                .get("APP_NAME")
                .unwrap_or_else(|| "map-search-agent".to_owned()),
            http,
            embedding,
            database,
            graph,
            store,
            sweep_interval: Duration::from_secs(sweep_secs),
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Trimmed value; empty counts as unset.
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing { name })
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(name)
            .map_or(Ok(default), |raw| raw.parse().map_err(|e| self.invalid(name, e)))
    }

    /// Comma-separated list; unset means empty.
    fn list<T>(&self, name: &'static str) -> Result<Vec<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(name).map_or_else(
            || Ok(Vec::new()),
            |raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| part.parse().map_err(|e| self.invalid(name, e)))
                    .collect()
            },
        )
    }

    fn invalid(&self, name: &'static str, reason: impl Display) -> ConfigError {
        ConfigError::Invalid {
            name,
            value: self.get(name).unwrap_or_default(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn defaults_with_only_database_url() {
        let config = AppConfig::from_map(&vars(&[("DATABASE_URL", "postgresql://db/maps")]));
        assert!(config.is_ok(), "{config:?}");
        let Ok(config) = config else { return };

        assert_eq!(config.app_name, "map-search-agent");
        assert_eq!(config.http.pool, PoolConfig::default());
        assert_eq!(config.http.read_timeout, Duration::from_secs(3));
        assert_eq!(config.http.retry, BackoffPolicy::default());
        assert_eq!(config.embedding.base_url, None);
        assert_eq!(config.embedding.model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.database.max_connections, 10);
        assert!(config.graph.is_none());
        assert_eq!(config.store.expire_days, 30);
        assert_eq!(config.store.search, SimilarityQuery::default());
        assert_eq!(config.store.hnsw, HnswParams::default());
        assert_eq!(config.sweep_interval, Duration::from_secs(3600));
    }

    #[test]
    fn database_url_is_required() {
        let result = AppConfig::from_map(&vars(&[("DATABASE_URL", "  ")]));
        assert!(matches!(
            result,
            Err(ConfigError::Missing {
                name: "DATABASE_URL"
            })
        ));
    }

    #[test]
    fn retry_settings() {
        let config = AppConfig::from_map(&vars(&[
            ("DATABASE_URL", "postgresql://db/maps"),
            ("RETRY_MAX_ATTEMPTS", "4"),
            ("RETRY_STRATEGY", "Equal"),
            ("RETRY_ON_STATUS", "502, 503,504"),
            ("RETRY_ON_READ_TIMEOUT", "true"),
        ]))
        .ok();
        let retry = config.map(|c| c.http.retry);
        assert_eq!(retry.as_ref().map(BackoffPolicy::max_attempts), Some(4));
        assert_eq!(
            retry.as_ref().map(BackoffPolicy::strategy),
            Some(JitterStrategy::Equal)
        );
        assert!(retry.as_ref().is_some_and(|r| r.retries_status(503)));
        assert!(retry.as_ref().is_some_and(|r| !r.retries_status(500)));
        assert!(retry.is_some_and(|r| r.retry_on_read_timeout()));
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let result = AppConfig::from_map(&vars(&[
            ("DATABASE_URL", "postgresql://db/maps"),
            ("RETRY_ON_STATUS", "503,abc"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { name: "RETRY_ON_STATUS", .. })
        ));

        let result = AppConfig::from_map(&vars(&[
            ("DATABASE_URL", "postgresql://db/maps"),
            ("RETRY_BASE_MS", "300"),
            ("RETRY_CAP_MS", "100"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));

        let result = AppConfig::from_map(&vars(&[
            ("DATABASE_URL", "postgresql://db/maps"),
            ("SWEEP_INTERVAL_SECS", "0"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { name: "SWEEP_INTERVAL_SECS", .. })
        ));
    }

    #[test]
    fn graph_is_enabled_by_url() {
        let config = AppConfig::from_map(&vars(&[
            ("DATABASE_URL", "postgresql://db/maps"),
            ("NEO4J_HTTP_URL", "http://graph:7474"),
            ("NEO4J_DATABASE", "maps"),
            ("NEO4J_USERNAME", "neo4j"),
            ("NEO4J_PASSWORD", "secret"),
        ]))
        .ok();
        let graph = config.and_then(|c| c.graph);
        assert_eq!(graph.as_ref().map(|g| g.database.as_str()), Some("maps"));
        assert_eq!(
            graph.and_then(|g| g.username),
            Some("neo4j".to_owned())
        );
    }
}
