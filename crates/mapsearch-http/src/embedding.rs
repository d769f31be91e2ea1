//! Text embedding over the embedding gateway.
//!
//! `POST {base}/api/v1/embeddings` with
//!
//! ```json
//! {"service_code": "...", "input": "...", "model": "...", "encoding_format": "float"}
//! ```
//!
//! answers `{"res": {"data": [{"index": 0, "embedding": [...]}]}}`. Errors
//! use the envelope shape (`state` plus `res.error.message`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::client::{HttpRequest, ResilientHttpClient};
use crate::domain::{DomainApiClient, ErrorBodyFormat};
use crate::error::DomainApiError;
use crate::transport::{ReqwestTransport, Transport};

/// Service name reported by [`EmbeddingClient`] errors.
pub const EMBEDDING_API: &str = "PE Tool Embedding API";

/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default service code sent with every request.
pub const DEFAULT_SERVICE_CODE: &str = "map-search-agent";

const EMBEDDINGS_ENDPOINT: &str = "/api/v1/embeddings";

#[derive(Serialize)]
#[serde(untagged)]
enum Input {
    One(String),
    Many(Vec<String>),
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    service_code: &'a str,
    input: Input,
    model: &'a str,
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    res: EmbeddingPayload,
}

#[derive(Deserialize)]
struct EmbeddingPayload {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client producing embedding vectors for text.
pub struct EmbeddingClient<T = ReqwestTransport> {
    inner: DomainApiClient<T>,
    model: String,
    service_code: String,
}

impl<T: Transport> EmbeddingClient<T> {
    /// Embedding client at `base_url` using the default model.
    pub fn new(base_url: impl Into<String>, http: Arc<ResilientHttpClient<T>>) -> Self {
        Self {
            inner: DomainApiClient::new(EMBEDDING_API, base_url, http)
                .with_error_format(ErrorBodyFormat::Envelope),
            model: DEFAULT_EMBEDDING_MODEL.to_owned(),
            service_code: DEFAULT_SERVICE_CODE.to_owned(),
        }
    }

    /// Send `key` in header `header` on every request.
    ///
    /// # Errors
    ///
    /// Returns [`DomainApiError`] if the header name or key is invalid.
    pub fn with_api_key(mut self, header: &str, key: &str) -> Result<Self, DomainApiError> {
        self.inner = self.inner.with_api_key(header, key)?;
        Ok(self)
    }

    /// Use `model` instead of the default.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Use `service_code` instead of the default.
    #[must_use]
    pub fn with_service_code(mut self, service_code: impl Into<String>) -> Self {
        self.service_code = service_code.into();
        self
    }

    /// Model name sent with every request.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed one text. Newlines are flattened to spaces first.
    ///
    /// # Errors
    ///
    /// Returns [`DomainApiError`] for empty input, a failed exchange, or a
    /// response without an embedding.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, DomainApiError> {
        if text.trim().is_empty() {
            return Err(DomainApiError::message(EMBEDDING_API, "input text is empty"));
        }
        self.send(Input::One(flatten(text)))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DomainApiError::message(EMBEDDING_API, "response carried no embedding"))
    }

    /// Embed several texts, returning vectors in input order.
    ///
    /// # Errors
    ///
    /// Returns [`DomainApiError`] for empty input, a failed exchange, or a
    /// response whose vector count differs from the input count.
    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, DomainApiError> {
        if texts.is_empty() {
            return Err(DomainApiError::message(EMBEDDING_API, "input texts are empty"));
        }
        let input = texts.iter().map(|t| flatten(t)).collect();
        let vectors = self.send(Input::Many(input)).await?;
        if vectors.len() != texts.len() {
            return Err(DomainApiError::message(
                EMBEDDING_API,
                format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            ));
        }
        Ok(vectors)
    }

    async fn send(&self, input: Input) -> Result<Vec<Vec<f32>>, DomainApiError> {
        let body = EmbeddingRequest {
            service_code: &self.service_code,
            input,
            model: &self.model,
            encoding_format: "float",
        };
        let request = HttpRequest::post(EMBEDDINGS_ENDPOINT).json(&body).map_err(|e| {
            DomainApiError::message(EMBEDDING_API, format!("failed to encode request: {e}"))
        })?;
        let response: EmbeddingResponse = self.inner.request_json(request).await?;

        let mut items = response.res.data;
        items.sort_by_key(|item| item.index.unwrap_or(usize::MAX));
        Ok(items.into_iter().map(|item| item.embedding).collect())
    }
}

fn flatten(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_shape() {
        let body = EmbeddingRequest {
            service_code: DEFAULT_SERVICE_CODE,
            input: Input::One(flatten("a\nb")),
            model: DEFAULT_EMBEDDING_MODEL,
            encoding_format: "float",
        };
        let value = serde_json::to_value(&body).ok();
        assert_eq!(
            value,
            Some(serde_json::json!({
                "service_code": "map-search-agent",
                "input": "a b",
                "model": "text-embedding-3-small",
                "encoding_format": "float",
            }))
        );
    }

    #[test]
    fn batch_input_is_an_array() {
        let input = Input::Many(vec!["x".to_owned(), "y".to_owned()]);
        assert_eq!(
            serde_json::to_value(&input).ok(),
            Some(serde_json::json!(["x", "y"]))
        );
    }
}
