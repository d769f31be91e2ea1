//! Neo4j access over the HTTP transactional endpoint.
//!
//! A [`GraphSession`] is one open server-side transaction:
//!
//! ```text
//! POST   {base}/db/{db}/tx            begin      -> commit URL
//! POST   {base}/db/{db}/tx/{id}       run Cypher -> {results, errors}
//! POST   {base}/db/{db}/tx/{id}/commit
//! DELETE {base}/db/{db}/tx/{id}       rollback
//! ```
//!
//! Requests go through the shared [`ResilientHttpClient`]. Begin, run and
//! commit are sent at most once: a lost response may hide a statement the
//! server already executed. Only the rollback `DELETE` is retried. A
//! statement error makes the server roll the transaction back; the session
//! is then finished.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use mapsearch_http::header::{ACCEPT, AUTHORIZATION, HeaderName, HeaderValue};
use mapsearch_http::{HttpRequest, Method, RequestError, ResilientHttpClient};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::error::DbError;
use crate::scope::{ScopedSession, SessionScope};

const BACKEND: &str = "neo4j";

/// Default Neo4j database name.
pub const DEFAULT_DATABASE: &str = "neo4j";

const ACCESS_MODE_HEADER: &str = "access-mode";

tokio::task_local! {
    static GRAPH_SESSION: Arc<GraphSession>;
}

/// Ambient graph session of the current task.
pub static GRAPH_SCOPE: SessionScope<GraphSession> = SessionScope::new(&GRAPH_SESSION, BACKEND);

/// One result row, keyed by column name.
pub type GraphRow = Map<String, Value>;

/// Connection settings for the Neo4j HTTP endpoint.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Base URL, e.g. `http://localhost:7474`.
    pub http_url: String,
    /// Database name.
    pub database: String,
    /// Basic auth user.
    pub username: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
}

impl GraphConfig {
    /// Configuration for the default database without credentials.
    pub fn new(http_url: &str) -> Self {
        Self {
            http_url: http_url.trim_end_matches('/').to_owned(),
            database: DEFAULT_DATABASE.to_owned(),
            username: None,
            password: None,
        }
    }

    /// Use `database` instead of the default.
    #[must_use]
    pub fn with_database(mut self, database: &str) -> Self {
        database.clone_into(&mut self.database);
        self
    }

    /// Authenticate with HTTP basic auth.
    #[must_use]
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_owned());
        self.password = Some(password.to_owned());
        self
    }
}

/// Transaction access mode, forwarded for cluster routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-only statements.
    Read,
    /// Reads and writes.
    Write,
}

impl AccessMode {
    const fn header_value(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
        }
    }
}

#[derive(Deserialize)]
struct TxResponse {
    #[serde(default)]
    commit: Option<String>,
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<ServerError>,
}

#[derive(Deserialize)]
struct StatementResult {
    columns: Vec<String>,
    data: Vec<RowData>,
}

#[derive(Deserialize)]
struct RowData {
    row: Vec<Value>,
}

#[derive(Deserialize)]
struct ServerError {
    code: String,
    message: String,
}

impl TxResponse {
    /// First server error, if any.
    fn into_checked(self) -> Result<Self, DbError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(DbError::Cypher {
                code: error.code,
                message: error.message,
            }),
            None => Ok(Self {
                errors: Vec::new(),
                ..self
            }),
        }
    }

    /// Rows of the first statement result.
    fn into_rows(self) -> Vec<GraphRow> {
        let Some(result) = self.results.into_iter().next() else {
            return Vec::new();
        };
        result
            .data
            .into_iter()
            .map(|data| result.columns.iter().cloned().zip(data.row).collect())
            .collect()
    }
}

/// HTTP plumbing shared by the database handle and its sessions.
#[derive(Clone)]
struct GraphClient {
    http: Arc<ResilientHttpClient>,
    auth: Option<HeaderValue>,
}

impl GraphClient {
    fn request(&self, method: Method, url: &str) -> HttpRequest {
        let mut request =
            HttpRequest::new(method, url).header(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(auth) = &self.auth {
            request = request.header(AUTHORIZATION, auth.clone());
        }
        request
    }

    async fn post(&self, request: HttpRequest, body: &Value) -> Result<TxResponse, DbError> {
        let outcome = self.http.execute(request.json(body)?).await?;
        if !outcome.is_success() {
            return Err(DbError::Graph(RequestError::InvalidStatus {
                status: outcome.status_code(),
                body: outcome.into_body(),
            }));
        }
        let response: TxResponse = outcome.json_as()?;
        response.into_checked()
    }

    async fn delete(&self, url: &str) -> Result<(), DbError> {
        let outcome = self.http.execute(self.request(Method::DELETE, url)).await?;
        if outcome.is_success() {
            Ok(())
        } else {
            Err(DbError::Graph(RequestError::InvalidStatus {
                status: outcome.status_code(),
                body: outcome.into_body(),
            }))
        }
    }
}

/// One open Neo4j transaction.
pub struct GraphSession {
    id: Uuid,
    mode: AccessMode,
    tx_url: String,
    commit_url: String,
    finished: AtomicBool,
    client: GraphClient,
}

impl GraphSession {
    /// Session identifier used in logs.
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Access mode the transaction was opened with.
    pub const fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Transaction URL on the server.
    pub fn tx_url(&self) -> &str {
        &self.tx_url
    }

    /// Whether the transaction has been committed or rolled back.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Run one Cypher statement and return its rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::SessionClosed`] after commit or rollback,
    /// [`DbError::Cypher`] if the server rejects the statement (the
    /// transaction is then finished), or [`DbError::Graph`] on transport
    /// failure.
    pub async fn run(&self, cypher: &str, params: Value) -> Result<Vec<GraphRow>, DbError> {
        if self.is_finished() {
            return Err(DbError::SessionClosed { backend: BACKEND });
        }
        let body = json!({
            "statements": [{"statement": cypher, "parameters": params}],
        });
        let request = self.client.request(Method::POST, &self.tx_url).without_retries();
        match self.client.post(request, &body).await {
            Ok(response) => Ok(response.into_rows()),
            Err(error) => {
                if matches!(error, DbError::Cypher { .. }) {
                    self.finished.store(true, Ordering::SeqCst);
                }
                tracing::warn!(session = %self.id, error = %error, "Cypher statement failed");
                Err(error)
            }
        }
    }

    /// Commit the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::SessionClosed`] if already finished, or the
    /// server or transport error.
    pub async fn commit(&self) -> Result<(), DbError> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Err(DbError::SessionClosed { backend: BACKEND });
        }
        let request = self
            .client
            .request(Method::POST, &self.commit_url)
            .without_retries();
        self.client.post(request, &json!({"statements": []})).await?;
        tracing::debug!(session = %self.id, "committed graph session");
        Ok(())
    }

    /// Roll the transaction back.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::SessionClosed`] if already finished, or the
    /// transport error.
    pub async fn rollback(&self) -> Result<(), DbError> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Err(DbError::SessionClosed { backend: BACKEND });
        }
        self.client.delete(&self.tx_url).await?;
        tracing::debug!(session = %self.id, "rolled back graph session");
        Ok(())
    }
}

impl ScopedSession for GraphSession {
    fn abort(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::warn!(session = %self.id, "rolling back abandoned graph session");
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.client.clone();
        let url = self.tx_url.clone();
        runtime.spawn(async move {
            if let Err(error) = client.delete(&url).await {
                tracing::warn!(url, error = %error, "graph rollback failed, server will expire the transaction");
            }
        });
    }
}

/// Handle to a Neo4j database over HTTP.
#[derive(Clone)]
pub struct GraphDatabase {
    tx_endpoint: String,
    client: GraphClient,
}

impl GraphDatabase {
    /// Database handle sending requests through `http`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the credentials cannot form a header.
    pub fn new(config: &GraphConfig, http: Arc<ResilientHttpClient>) -> Result<Self, DbError> {
        let auth = match (&config.username, &config.password) {
            (Some(user), password) => {
                let token = STANDARD.encode(format!(
                    "{user}:{}",
                    password.as_deref().unwrap_or_default()
                ));
                let mut value = HeaderValue::from_str(&format!("Basic {token}"))
                    .map_err(|e| DbError::Config(format!("invalid Neo4j credentials: {e}")))?;
                value.set_sensitive(true);
                Some(value)
            }
            (None, _) => None,
        };
        Ok(Self {
            tx_endpoint: format!(
                "{}/db/{}/tx",
                config.http_url.trim_end_matches('/'),
                config.database
            ),
            client: GraphClient { http, auth },
        })
    }

    /// Transaction endpoint URL.
    pub fn tx_endpoint(&self) -> &str {
        &self.tx_endpoint
    }

    /// Open a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Graph`] if the server cannot be reached, or
    /// [`DbError::Cypher`] if it refuses the transaction.
    pub async fn begin_session(&self, mode: AccessMode) -> Result<Arc<GraphSession>, DbError> {
        let request = self
            .client
            .request(Method::POST, &self.tx_endpoint)
            .header(
                HeaderName::from_static(ACCESS_MODE_HEADER),
                HeaderValue::from_static(mode.header_value()),
            )
            .without_retries();
        let response = self.client.post(request, &json!({"statements": []})).await?;
        let commit_url = response.commit.ok_or_else(|| {
            DbError::Config("Neo4j did not return a commit URL for the transaction".to_owned())
        })?;
        let tx_url = commit_url
            .strip_suffix("/commit")
            .unwrap_or(&commit_url)
            .to_owned();

        let session = GraphSession {
            id: Uuid::now_v7(),
            mode,
            tx_url,
            commit_url,
            finished: AtomicBool::new(false),
            client: self.client.clone(),
        };
        tracing::debug!(session = %session.id, tx = session.tx_url, "began graph session");
        Ok(Arc::new(session))
    }

    /// Run `work` inside a fresh ambient graph session.
    ///
    /// Commits when `work` returns `Ok`, rolls back when it returns `Err`
    /// or is dropped.
    ///
    /// # Errors
    ///
    /// Returns the error of `work`, or a [`DbError`] from opening or
    /// committing the transaction.
    pub async fn with_session<F, Fut, T, E>(&self, mode: AccessMode, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DbError>,
    {
        let session = self.begin_session(mode).await?;
        let result = GRAPH_SCOPE.scope(Arc::clone(&session), work()).await;

        if session.is_finished() {
            return result;
        }
        match result {
            Ok(value) => {
                session.commit().await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback) = session.rollback().await {
                    tracing::warn!(
                        session = %session.id,
                        error = %rollback,
                        "graph rollback after failed scope did not complete"
                    );
                }
                Err(error)
            }
        }
    }
}

/// Cypher execution on the explicit or ambient graph session.
#[derive(Default)]
pub struct GraphStore {
    session: Option<Arc<GraphSession>>,
}

impl GraphStore {
    /// Store using the ambient session of each calling task.
    pub const fn ambient() -> Self {
        Self { session: None }
    }

    /// Store bound to `session`, ignoring any ambient session.
    pub const fn with_session(session: Arc<GraphSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    fn session(&self) -> Result<Arc<GraphSession>, DbError> {
        GRAPH_SCOPE.resolve(self.session.as_ref())
    }

    /// Run a read statement.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoActiveSession`] outside a scope, or any error of
    /// [`GraphSession::run`].
    pub async fn read(&self, cypher: &str, params: Value) -> Result<Vec<GraphRow>, DbError> {
        self.session()?.run(cypher, params).await
    }

    /// Run a read statement and deserialize each row into `T`.
    ///
    /// # Errors
    ///
    /// As [`Self::read`], plus [`DbError::Serialization`] for a row that
    /// does not fit `T`.
    pub async fn read_as<T: DeserializeOwned>(
        &self,
        cypher: &str,
        params: Value,
    ) -> Result<Vec<T>, DbError> {
        self.read(cypher, params)
            .await?
            .into_iter()
            .map(|row| serde_json::from_value(Value::Object(row)).map_err(DbError::from))
            .collect()
    }

    /// Run a write statement.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ReadOnlySession`] in a read session, otherwise as
    /// [`Self::read`].
    pub async fn write(&self, cypher: &str, params: Value) -> Result<Vec<GraphRow>, DbError> {
        let session = self.session()?;
        if session.mode() == AccessMode::Read {
            return Err(DbError::ReadOnlySession);
        }
        session.run(cypher, params).await
    }
}
