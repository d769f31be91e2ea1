//! Error types for outbound HTTP calls.
//!
//! Every terminal failure leaving [`ResilientHttpClient`](crate::ResilientHttpClient)
//! is exactly one [`RequestError`] variant. Service clients built on
//! [`DomainApiClient`](crate::DomainApiClient) narrow that further to a
//! [`DomainApiError`] naming the external service that failed, so no raw
//! transport error crosses a client boundary undecorated.

use std::fmt;
use std::time::Duration;

/// Which part of an HTTP exchange ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Establishing the TCP/TLS connection.
    Connect,
    /// Waiting for or reading the response.
    Read,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Read => f.write_str("read"),
        }
    }
}

/// Terminal failure of one logical request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestError {
    /// A retryable status was still returned on the final attempt, or a
    /// caller layer rejected a non-2xx status.
    #[error("HTTP status {status}: {}", String::from_utf8_lossy(.body))]
    InvalidStatus {
        /// Response status code.
        status: u16,
        /// Raw response body.
        body: Vec<u8>,
    },

    /// The connect or read deadline was exceeded.
    #[error("{phase} timeout exceeded")]
    Timeout {
        /// Phase that timed out.
        phase: TimeoutPhase,
    },

    /// Low-level connection, DNS, or TLS failure.
    #[error("transport failure: {cause}")]
    TransportFailure {
        /// Rendered cause of the failure.
        cause: String,
    },

    /// A service-specific failure decorated by a domain client.
    #[error(transparent)]
    DomainApi(#[from] DomainApiError),
}

impl RequestError {
    /// Status code carried by the error, if any.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::InvalidStatus { status, .. } => Some(*status),
            Self::DomainApi(e) => e.status,
            Self::Timeout { .. } | Self::TransportFailure { .. } => None,
        }
    }
}

/// Failure of a named external service.
///
/// Built from a parsed error body when the service returned one; `code` and
/// `message` are `None` when the body was not the expected JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to request {api}{}", self.details())]
pub struct DomainApiError {
    /// External service that failed (e.g. `"Synonym API"`).
    pub api: &'static str,
    /// HTTP status, when a response was received.
    pub status: Option<u16>,
    /// Service-specific error code.
    pub code: Option<String>,
    /// Service-specific or transport-level message.
    pub message: Option<String>,
}

impl DomainApiError {
    /// Error with only a message (no response was usable).
    pub fn message(api: &'static str, message: impl Into<String>) -> Self {
        Self {
            api,
            status: None,
            code: None,
            message: Some(message.into()),
        }
    }

    /// ` (status_code=.., code=.., message=..)` for the fields present.
    fn details(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(status) = self.status {
            parts.push(format!("status_code={status}"));
        }
        if let Some(code) = &self.code {
            parts.push(format!("code={code}"));
        }
        if let Some(message) = &self.message {
            parts.push(format!("message={message}"));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!(" ({})", parts.join(", "))
        }
    }
}

/// Invalid backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// The base delay must be positive.
    #[error("backoff base delay must be greater than zero")]
    ZeroBase,

    /// The cap must not be smaller than the base delay.
    #[error("backoff cap {cap:?} is below base {base:?}")]
    CapBelowBase {
        /// Configured base delay.
        base: Duration,
        /// Configured cap.
        cap: Duration,
    },

    /// Unrecognised jitter strategy name.
    #[error("unknown jitter strategy: {0}")]
    UnknownStrategy(String),
}
