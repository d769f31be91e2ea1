//! Per-service API client layered over [`ResilientHttpClient`].
//!
//! A [`DomainApiClient`] knows one external service: its base URL, its API
//! key header, and the shape of its error bodies. Callers pass endpoint
//! paths; every failure comes back as a [`DomainApiError`] naming the
//! service.
//!
//! Header precedence, lowest to highest:
//!
//! 1. `content-type: application/json`
//! 2. the service API key header
//! 3. `x-request-id` from the ambient [request context](crate::context)
//! 4. headers set on the request by the caller

use std::sync::Arc;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::client::{HttpRequest, ResilientHttpClient, merge_headers};
use crate::context::{REQUEST_ID_HEADER, current_request_id};
use crate::error::{DomainApiError, RequestError};
use crate::outcome::RequestOutcome;
use crate::transport::{ReqwestTransport, Transport};

/// Header the gateway-fronted services read the API key from.
pub const APIM_KEY_HEADER: &str = "x-apim-key";

/// Where a service puts its error code and message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorBodyFormat {
    /// `{"code": ..., "message": ...}` at the top level.
    #[default]
    Flat,
    /// `{"state": <code>, "res": {"error": {"message": ...}}}`.
    Envelope,
}

impl ErrorBodyFormat {
    /// Extract `(code, message)` from an error body. Both are `None` when
    /// the body is not a JSON object.
    pub fn extract(self, body: &[u8]) -> (Option<String>, Option<String>) {
        let Ok(serde_json::Value::Object(map)) = serde_json::from_slice::<serde_json::Value>(body)
        else {
            return (None, None);
        };
        match self {
            Self::Flat => (
                map.get("code").and_then(scalar_to_string),
                map.get("message").and_then(scalar_to_string),
            ),
            Self::Envelope => (
                map.get("state").and_then(scalar_to_string),
                map.get("res")
                    .and_then(|res| res.get("error"))
                    .and_then(|error| error.get("message"))
                    .and_then(scalar_to_string),
            ),
        }
    }
}

/// Render a JSON string or number; other kinds are treated as absent.
fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Client for one external service.
pub struct DomainApiClient<T = ReqwestTransport> {
    api: &'static str,
    base_url: String,
    default_headers: HeaderMap,
    error_format: ErrorBodyFormat,
    http: Arc<ResilientHttpClient<T>>,
}

impl<T: Transport> DomainApiClient<T> {
    /// Client for service `api` at `base_url`, sending JSON by default.
    pub fn new(
        api: &'static str,
        base_url: impl Into<String>,
        http: Arc<ResilientHttpClient<T>>,
    ) -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            api,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            default_headers,
            error_format: ErrorBodyFormat::Flat,
            http,
        }
    }

    /// Send `key` in header `header` on every request. An empty key sends
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`DomainApiError`] if the header name or key is not a valid
    /// header.
    pub fn with_api_key(mut self, header: &str, key: &str) -> Result<Self, DomainApiError> {
        if key.is_empty() {
            return Ok(self);
        }
        let name = HeaderName::from_bytes(header.as_bytes())
            .map_err(|e| DomainApiError::message(self.api, format!("invalid header name: {e}")))?;
        let mut value = HeaderValue::from_str(key)
            .map_err(|e| DomainApiError::message(self.api, format!("invalid API key: {e}")))?;
        value.set_sensitive(true);
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Set how error bodies are parsed.
    #[must_use]
    pub const fn with_error_format(mut self, format: ErrorBodyFormat) -> Self {
        self.error_format = format;
        self
    }

    /// Service name used in errors and logs.
    pub const fn api(&self) -> &'static str {
        self.api
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Shared retrying client.
    pub const fn http(&self) -> &Arc<ResilientHttpClient<T>> {
        &self.http
    }

    /// Absolute URL for `endpoint`.
    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.is_empty() {
            self.base_url.clone()
        } else if endpoint.starts_with('/') {
            format!("{}{endpoint}", self.base_url)
        } else {
            format!("{}/{endpoint}", self.base_url)
        }
    }

    /// Execute `request`, whose URL is an endpoint path relative to the
    /// base URL.
    ///
    /// # Errors
    ///
    /// Returns [`DomainApiError`] for any non-2xx response (with the code
    /// and message parsed from the body when possible) and for every
    /// transport failure.
    pub async fn request(&self, request: HttpRequest) -> Result<RequestOutcome, DomainApiError> {
        let method = request.method().clone();
        let url = self.url_for(request.url());

        let mut headers = self.default_headers.clone();
        if let Some(request_id) = current_request_id() {
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                headers.insert(REQUEST_ID_HEADER, value);
            }
        }
        merge_headers(&mut headers, request.header_map().clone());
        let request = request.rebase(url.clone(), headers);

        info!(api = self.api, method = %method, url, "domain api request");

        let result = match self.http.execute(request).await {
            Ok(outcome) if outcome.is_success() => {
                info!(
                    api = self.api,
                    status = outcome.status_code(),
                    attempts = outcome.attempts(),
                    "domain api response"
                );
                return Ok(outcome);
            }
            Ok(outcome) => self.decorate_status(outcome.status_code(), outcome.body()),
            Err(RequestError::InvalidStatus { status, body }) => {
                self.decorate_status(status, &body)
            }
            Err(RequestError::DomainApi(error)) => error,
            Err(other) => DomainApiError::message(self.api, other.to_string()),
        };

        warn!(api = self.api, method = %method, url, error = %result, "domain api request failed");
        Err(result)
    }

    /// Execute `request` and deserialize the JSON response into `R`.
    ///
    /// # Errors
    ///
    /// As [`Self::request`], plus a [`DomainApiError`] carrying the status
    /// when the body is not JSON of shape `R`.
    pub async fn request_json<R: DeserializeOwned>(
        &self,
        request: HttpRequest,
    ) -> Result<R, DomainApiError> {
        let outcome = self.request(request).await?;
        outcome.json_as::<R>().map_err(|e| DomainApiError {
            api: self.api,
            status: Some(outcome.status_code()),
            code: None,
            message: Some(format!("unexpected response body: {e}")),
        })
    }

    fn decorate_status(&self, status: u16, body: &[u8]) -> DomainApiError {
        let (code, message) = self.error_format.extract(body);
        DomainApiError {
            api: self.api,
            status: Some(status),
            code,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> DomainApiClient {
        DomainApiClient::new(
            "Synonym API",
            "http://synonym.local/",
            Arc::new(ResilientHttpClient::new(
                crate::transport::PoolConfig::default(),
                crate::backoff::BackoffPolicy::default(),
            )),
        )
    }

    #[test]
    fn url_joining() {
        let c = client();
        assert_eq!(c.base_url(), "http://synonym.local");
        assert_eq!(c.url_for("/x"), "http://synonym.local/x");
        assert_eq!(c.url_for("x/y"), "http://synonym.local/x/y");
        assert_eq!(c.url_for(""), "http://synonym.local");
    }

    #[test]
    fn flat_error_body() {
        let (code, message) = ErrorBodyFormat::Flat.extract(br#"{"code":"E1","message":"bad"}"#);
        assert_eq!(code.as_deref(), Some("E1"));
        assert_eq!(message.as_deref(), Some("bad"));

        let (code, _) = ErrorBodyFormat::Flat.extract(br#"{"code":4001}"#);
        assert_eq!(code.as_deref(), Some("4001"));
    }

    #[test]
    fn envelope_error_body() {
        let body = br#"{"state":"FAIL","res":{"error":{"message":"quota"}}}"#;
        let (code, message) = ErrorBodyFormat::Envelope.extract(body);
        assert_eq!(code.as_deref(), Some("FAIL"));
        assert_eq!(message.as_deref(), Some("quota"));
    }

    #[test]
    fn unparseable_error_body_yields_nothing() {
        assert_eq!(ErrorBodyFormat::Flat.extract(b"oops"), (None, None));
        assert_eq!(ErrorBodyFormat::Envelope.extract(b"[1,2]"), (None, None));
    }

    #[test]
    fn empty_api_key_sends_no_header() {
        let c = client().with_api_key(APIM_KEY_HEADER, "").ok();
        assert!(c.is_some_and(|c| !c.default_headers.contains_key(APIM_KEY_HEADER)));
    }

    #[test]
    fn invalid_api_key_is_rejected() {
        let result = client().with_api_key(APIM_KEY_HEADER, "bad\nkey");
        assert!(matches!(result, Err(DomainApiError { api: "Synonym API", .. })));
    }
}
