//! Outbound HTTP layer for the map search agent.
//!
//! Every call to an external service goes through one pooled, retrying
//! client. Failures surface as a small closed set of typed errors, and
//! per-service clients decorate them with the service name and the code
//! and message the service returned.
//!
//! # Architecture
//!
//! ```text
//! MapClient / SynonymClient / EmbeddingClient
//!     |
//!     +-- DomainApiClient      (base URL, API key, error decoration)
//!         |
//!         +-- ResilientHttpClient   (attempt loop, BackoffPolicy)
//!             |
//!             +-- Transport         (one exchange over the reqwest pool)
//! ```
//!
//! # Modules
//!
//! - [`backoff`] -- Exponential backoff with full or equal jitter
//! - [`client`] -- Retrying client and request builder
//! - [`context`] -- Task-local request id forwarded downstream
//! - [`domain`] -- Per-service client with error decoration
//! - [`embedding`] -- Text embedding client
//! - [`error`] -- Request failure taxonomy
//! - [`outcome`] -- Fully-read response with cached JSON
//! - [`services`] -- MAP and Synonym clients
//! - [`transport`] -- Connection pool seam

pub mod backoff;
pub mod client;
pub mod context;
pub mod domain;
pub mod embedding;
pub mod error;
pub mod outcome;
pub mod services;
pub mod transport;

// Re-export primary types for convenience.
pub use backoff::{BackoffPolicy, JitterStrategy};
pub use client::{HttpRequest, ResilientHttpClient};
pub use context::{current_request_id, with_request_id};
pub use domain::{DomainApiClient, ErrorBodyFormat};
pub use embedding::EmbeddingClient;
pub use error::{DomainApiError, PolicyError, RequestError, TimeoutPhase};
pub use outcome::{RawJson, RequestOutcome};
pub use services::{MapClient, SynonymClient};
pub use transport::{PoolConfig, ReqwestTransport, Transport};

// Re-exported so callers can build requests without a direct dependency.
pub use reqwest::Method;
pub use reqwest::header;
