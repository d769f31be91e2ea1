//! Clients for the gateway-fronted MAP and Synonym services.
//!
//! Both authenticate with [`APIM_KEY_HEADER`] and report errors as flat
//! `{"code", "message"}` bodies.

use std::sync::Arc;

use reqwest::Method;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::client::{HttpRequest, ResilientHttpClient};
use crate::domain::{APIM_KEY_HEADER, DomainApiClient, ErrorBodyFormat};
use crate::error::DomainApiError;
use crate::outcome::RequestOutcome;
use crate::transport::{ReqwestTransport, Transport};

/// Service name reported by [`MapClient`] errors.
pub const MAP_API: &str = "MAP API";

/// Service name reported by [`SynonymClient`] errors.
pub const SYNONYM_API: &str = "Synonym API";

fn body_error(api: &'static str, error: &serde_json::Error) -> DomainApiError {
    DomainApiError::message(api, format!("failed to encode request body: {error}"))
}

/// Client for the MAP data API.
pub struct MapClient<T = ReqwestTransport> {
    inner: DomainApiClient<T>,
}

impl<T: Transport> MapClient<T> {
    /// MAP client at `base_url` authenticating with `api_key`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainApiError`] if `api_key` is not a valid header value.
    pub fn new(
        base_url: impl Into<String>,
        api_key: &str,
        http: Arc<ResilientHttpClient<T>>,
    ) -> Result<Self, DomainApiError> {
        let inner = DomainApiClient::new(MAP_API, base_url, http)
            .with_api_key(APIM_KEY_HEADER, api_key)?
            .with_error_format(ErrorBodyFormat::Flat);
        Ok(Self { inner })
    }

    /// Underlying domain client.
    pub const fn domain(&self) -> &DomainApiClient<T> {
        &self.inner
    }

    /// `GET` `endpoint` and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Returns [`DomainApiError`] on any failed or non-2xx exchange or an
    /// undecodable body.
    pub async fn get_json<R: DeserializeOwned>(&self, endpoint: &str) -> Result<R, DomainApiError> {
        self.inner.request_json(HttpRequest::get(endpoint)).await
    }

    /// `POST` `body` as JSON to `endpoint` and decode the JSON response.
    ///
    /// # Errors
    ///
    /// As [`Self::get_json`], plus an encoding failure of `body`.
    pub async fn post_json<B, R>(&self, endpoint: &str, body: &B) -> Result<R, DomainApiError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let request = HttpRequest::post(endpoint)
            .json(body)
            .map_err(|e| body_error(MAP_API, &e))?;
        self.inner.request_json(request).await
    }
}

/// Client for the Synonym API.
pub struct SynonymClient<T = ReqwestTransport> {
    inner: DomainApiClient<T>,
}

impl<T: Transport> SynonymClient<T> {
    /// Synonym client at `base_url` authenticating with `api_key`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainApiError`] if `api_key` is not a valid header value.
    pub fn new(
        base_url: impl Into<String>,
        api_key: &str,
        http: Arc<ResilientHttpClient<T>>,
    ) -> Result<Self, DomainApiError> {
        let inner = DomainApiClient::new(SYNONYM_API, base_url, http)
            .with_api_key(APIM_KEY_HEADER, api_key)?
            .with_error_format(ErrorBodyFormat::Flat);
        Ok(Self { inner })
    }

    /// Underlying domain client.
    pub const fn domain(&self) -> &DomainApiClient<T> {
        &self.inner
    }

    /// Send `body` to `endpoint` with `method`, caller `headers` taking
    /// precedence over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`DomainApiError`] on any failed or non-2xx exchange.
    pub async fn request<B: Serialize + ?Sized + Sync>(
        &self,
        method: Method,
        endpoint: &str,
        headers: HeaderMap,
        body: Option<&B>,
    ) -> Result<RequestOutcome, DomainApiError> {
        let mut request = HttpRequest::new(method, endpoint).headers(headers);
        if let Some(body) = body {
            request = request.json(body).map_err(|e| body_error(SYNONYM_API, &e))?;
        }
        self.inner.request(request).await
    }

    /// `POST` `body` as JSON to `endpoint` and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Returns [`DomainApiError`] on any failed or non-2xx exchange or an
    /// undecodable body.
    pub async fn post_json<B, R>(&self, endpoint: &str, body: &B) -> Result<R, DomainApiError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let request = HttpRequest::post(endpoint)
            .json(body)
            .map_err(|e| body_error(SYNONYM_API, &e))?;
        self.inner.request_json(request).await
    }
}
