//! The seam between the retry loop and the network.
//!
//! [`Transport`] performs exactly one exchange and reports failures already
//! classified into timeout or connection failures. The production
//! implementation, [`ReqwestTransport`], wraps a pooled [`reqwest::Client`]
//! that is either owned (created lazily, released on [`Transport::close`])
//! or supplied by the caller and shared with other clients.

use std::error::Error as _;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};

use crate::error::TimeoutPhase;

/// Default maximum idle connections kept per host.
pub const DEFAULT_MAX_IDLE_PER_HOST: usize = 20;

/// Default keep-alive expiry for idle pooled connections.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection pool sizing and connect behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum idle connections kept per host.
    pub max_idle_per_host: usize,
    /// How long an idle connection stays in the pool.
    pub idle_timeout: Duration,
    /// Deadline for establishing a connection.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: DEFAULT_MAX_IDLE_PER_HOST,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl PoolConfig {
    /// Build a pooled client from this configuration.
    ///
    /// Use this to create one pool shared by several clients via
    /// [`ReqwestTransport::shared`].
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialised.
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_idle_timeout(self.idle_timeout)
            .connect_timeout(self.connect_timeout)
            .build()
    }
}

/// One request as handed to a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Option<Vec<u8>>,
    /// Deadline for receiving and reading the response.
    pub timeout: Duration,
}

/// A response whose body has been read in full.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Vec<u8>,
}

/// Failure of a single exchange, already classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A connect or read deadline was exceeded.
    Timeout(TimeoutPhase),
    /// Connection, DNS, TLS, or protocol failure.
    Connection(String),
}

/// Performs single HTTP exchanges over a connection pool.
pub trait Transport: Send + Sync {
    /// Send one request and read the whole response body.
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;

    /// Release the pool if this transport owns it. Idempotent.
    fn close(&self);

    /// Whether an owned pool has been released and not yet recreated.
    fn is_closed(&self) -> bool;
}

enum PoolHandle {
    Owned {
        config: PoolConfig,
        slot: Mutex<Option<reqwest::Client>>,
    },
    Shared(reqwest::Client),
}

/// [`Transport`] backed by a pooled [`reqwest::Client`].
pub struct ReqwestTransport {
    pool: PoolHandle,
}

impl ReqwestTransport {
    /// Transport that owns its pool, created on first use.
    pub const fn new(config: PoolConfig) -> Self {
        Self {
            pool: PoolHandle::Owned {
                config,
                slot: Mutex::new(None),
            },
        }
    }

    /// Transport over an externally supplied pool. [`Transport::close`]
    /// leaves a shared pool untouched.
    pub const fn shared(client: reqwest::Client) -> Self {
        Self {
            pool: PoolHandle::Shared(client),
        }
    }

    /// Whether this transport owns its pool.
    pub const fn owns_pool(&self) -> bool {
        matches!(self.pool, PoolHandle::Owned { .. })
    }

    /// Acquire the pooled client, creating it if absent or closed.
    ///
    /// The lock only covers the slot check; requests themselves run
    /// concurrently on clones of the same pool.
    fn client(&self) -> Result<reqwest::Client, TransportError> {
        match &self.pool {
            PoolHandle::Shared(client) => Ok(client.clone()),
            PoolHandle::Owned { config, slot } => {
                let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(client) = slot.as_ref() {
                    return Ok(client.clone());
                }
                let client = config
                    .build_client()
                    .map_err(|e| TransportError::Connection(render_error(&e)))?;
                tracing::debug!(
                    max_idle_per_host = config.max_idle_per_host,
                    "created HTTP connection pool"
                );
                *slot = Some(client.clone());
                Ok(client)
            }
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let client = self.client()?;

        let mut builder = client
            .request(request.method, &request.url)
            .headers(request.headers)
            .timeout(request.timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| classify(&e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| classify(&e))?;

        Ok(TransportResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }

    fn close(&self) {
        if let PoolHandle::Owned { slot, .. } = &self.pool {
            let released = slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .is_some();
            if released {
                tracing::debug!("released HTTP connection pool");
            }
        }
    }

    fn is_closed(&self) -> bool {
        match &self.pool {
            PoolHandle::Shared(_) => false,
            PoolHandle::Owned { slot, .. } => slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_none(),
        }
    }
}

/// Map a `reqwest` failure onto the timeout/connection split.
fn classify(error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        let phase = if error.is_connect() {
            TimeoutPhase::Connect
        } else {
            TimeoutPhase::Read
        };
        TransportError::Timeout(phase)
    } else {
        TransportError::Connection(render_error(error))
    }
}

/// Render an error with its source chain, which `reqwest` omits from
/// `Display`.
fn render_error(error: &reqwest::Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_pool_is_lazy_and_reopens_after_close() {
        let transport = ReqwestTransport::default();
        assert!(transport.owns_pool());
        assert!(transport.is_closed());

        assert!(transport.client().is_ok());
        assert!(!transport.is_closed());

        transport.close();
        assert!(transport.is_closed());
        transport.close();
        assert!(transport.is_closed());

        assert!(transport.client().is_ok());
        assert!(!transport.is_closed());
    }

    #[test]
    fn shared_pool_is_never_closed() {
        let transport = ReqwestTransport::shared(reqwest::Client::new());
        assert!(!transport.owns_pool());
        transport.close();
        assert!(!transport.is_closed());
    }

    #[tokio::test]
    async fn refused_connection_is_a_connection_failure() {
        let transport = ReqwestTransport::default();
        let request = TransportRequest {
            method: Method::GET,
            // Port 9 (discard) on loopback is closed on test hosts.
            url: "http://127.0.0.1:9/".to_owned(),
            headers: HeaderMap::new(),
            body: None,
            timeout: Duration::from_secs(2),
        };
        let result = transport.send(request).await;
        assert!(matches!(
            result,
            Err(TransportError::Connection(_) | TransportError::Timeout(TimeoutPhase::Connect))
        ));
    }
}
