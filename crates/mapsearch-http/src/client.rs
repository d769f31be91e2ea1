//! Connection-pooled HTTP client with bounded, jittered retries.
//!
//! [`ResilientHttpClient::execute`] runs one logical request as a strictly
//! sequential series of attempts:
//!
//! ```text
//! attempt 0 ──fail──> sleep(delay(0)) ──> attempt 1 ──fail──> ... ──> attempt N
//!     │                                       │                          │
//!   success                                 success                 surface error
//! ```
//!
//! where `N = policy.max_attempts()`. A response is a failure only when its
//! status is in the policy's retry set; every other status is returned to
//! the caller untouched. Connect timeouts and connection failures are always
//! retried; read timeouts only when the policy allows it.
//!
//! Dropping the returned future cancels the request: an in-flight exchange
//! or backoff sleep is abandoned and no further attempt starts.

use std::time::Duration;

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::error::{RequestError, TimeoutPhase};
use crate::outcome::RequestOutcome;
use crate::transport::{PoolConfig, ReqwestTransport, Transport, TransportError, TransportRequest};

/// Default deadline for receiving and reading a response.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);

/// A request to be executed with retries.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    timeout: Option<Duration>,
    retries: bool,
}

impl HttpRequest {
    /// Request with `method` to an absolute `url`.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            retries: true,
        }
    }

    /// `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// `POST` request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Set a header, replacing any previous value for `name`.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Merge `headers`, replacing existing values for the same names.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        merge_headers(&mut self.headers, headers);
        self
    }

    /// Set a raw body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body and default the content type.
    ///
    /// # Errors
    ///
    /// Returns the serialization error if `value` cannot be encoded.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_vec(value)?);
        self.headers
            .entry(CONTENT_TYPE)
            .or_insert_with(|| HeaderValue::from_static("application/json"));
        Ok(self)
    }

    /// Override the client's read deadline for this request only.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send this request at most once, whatever the client's policy.
    ///
    /// For requests the server must not see twice, such as a statement
    /// posted into an open transaction.
    #[must_use]
    pub const fn without_retries(mut self) -> Self {
        self.retries = false;
        self
    }

    /// Whether failed attempts may be re-sent.
    pub const fn retries(&self) -> bool {
        self.retries
    }

    /// HTTP method.
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Headers set so far.
    pub const fn header_map(&self) -> &HeaderMap {
        &self.headers
    }

    /// Body set so far.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Same request aimed at `url` with `headers` replacing its own.
    pub(crate) fn rebase(self, url: String, headers: HeaderMap) -> Self {
        Self {
            url,
            headers,
            ..self
        }
    }
}

/// Insert every entry of `overrides` into `base`, replacing all existing
/// values of each overridden name while keeping repeated values from
/// `overrides`.
pub(crate) fn merge_headers(base: &mut HeaderMap, overrides: HeaderMap) {
    let mut current: Option<HeaderName> = None;
    for (name, value) in overrides {
        if let Some(name) = name {
            base.insert(name.clone(), value);
            current = Some(name);
        } else if let Some(name) = &current {
            base.append(name.clone(), value);
        }
    }
}

/// HTTP client that retries transient failures with jittered backoff.
///
/// Cheap to share behind an [`Arc`](std::sync::Arc): the pool and policy
/// are read concurrently by every call.
pub struct ResilientHttpClient<T = ReqwestTransport> {
    transport: T,
    policy: BackoffPolicy,
    read_timeout: Duration,
}

impl ResilientHttpClient<ReqwestTransport> {
    /// Client owning a pool built lazily from `pool`.
    pub const fn new(pool: PoolConfig, policy: BackoffPolicy) -> Self {
        Self::with_transport(ReqwestTransport::new(pool), policy)
    }

    /// Client over an externally supplied pool. [`Self::close`] leaves the
    /// pool open.
    pub const fn with_shared_pool(client: reqwest::Client, policy: BackoffPolicy) -> Self {
        Self::with_transport(ReqwestTransport::shared(client), policy)
    }
}

impl<T: Transport> ResilientHttpClient<T> {
    /// Client over an arbitrary transport.
    pub const fn with_transport(transport: T, policy: BackoffPolicy) -> Self {
        Self {
            transport,
            policy,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Set the default read deadline.
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Retry policy.
    pub const fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Default read deadline.
    pub const fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Underlying transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Release the pool if this client owns it. Safe to call repeatedly;
    /// the next request recreates the pool.
    pub fn close(&self) {
        self.transport.close();
    }

    /// `GET` `url` with default settings.
    ///
    /// # Errors
    ///
    /// See [`Self::execute`].
    pub async fn get(&self, url: &str) -> Result<RequestOutcome, RequestError> {
        self.execute(HttpRequest::get(url)).await
    }

    /// Execute `request`, retrying transient failures per the policy.
    ///
    /// Returns the first response whose status is not in the retry set,
    /// whatever that status is.
    ///
    /// # Errors
    ///
    /// - [`RequestError::InvalidStatus`] if a retryable status is returned
    ///   by the final attempt.
    /// - [`RequestError::Timeout`] on a read timeout that may not be
    ///   retried, or any timeout on the final attempt.
    /// - [`RequestError::TransportFailure`] if the final attempt fails to
    ///   connect or exchange data.
    pub async fn execute(&self, request: HttpRequest) -> Result<RequestOutcome, RequestError> {
        let max_attempts = if request.retries {
            self.policy.max_attempts()
        } else {
            0
        };
        let raw = TransportRequest {
            method: request.method,
            url: request.url,
            headers: request.headers,
            body: request.body,
            timeout: request.timeout.unwrap_or(self.read_timeout),
        };

        let mut attempt: u32 = 0;
        loop {
            let failure = match self.transport.send(raw.clone()).await {
                Ok(response) => {
                    let status = response.status.as_u16();
                    if !self.policy.retries_status(status) {
                        let attempts = attempt.saturating_add(1);
                        debug!(
                            method = %raw.method,
                            url = raw.url,
                            status,
                            attempts,
                            "request completed"
                        );
                        return Ok(RequestOutcome::new(
                            response.status,
                            response.headers,
                            response.body,
                            attempts,
                        ));
                    }
                    RequestError::InvalidStatus {
                        status,
                        body: response.body,
                    }
                }
                Err(TransportError::Timeout(phase)) => {
                    let error = RequestError::Timeout { phase };
                    if phase == TimeoutPhase::Read && !self.policy.retry_on_read_timeout() {
                        warn!(
                            method = %raw.method,
                            url = raw.url,
                            attempt,
                            "read timeout, not retrying"
                        );
                        return Err(error);
                    }
                    error
                }
                Err(TransportError::Connection(cause)) => RequestError::TransportFailure { cause },
            };

            if attempt >= max_attempts {
                warn!(
                    method = %raw.method,
                    url = raw.url,
                    attempts = attempt.saturating_add(1),
                    error = %failure,
                    "request failed, retries exhausted"
                );
                return Err(failure);
            }

            let delay = self.policy.delay(attempt);
            warn!(
                method = %raw.method,
                url = raw.url,
                attempt,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %failure,
                "request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }
}
