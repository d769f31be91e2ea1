//! Uniform response type returned by every completed attempt.

use std::borrow::Cow;
use std::str::Utf8Error;
use std::sync::OnceLock;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

/// A fully-read HTTP response.
///
/// Immutable after construction. The JSON view of the body is parsed on
/// first access and cached for later calls.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    attempts: u32,
    json: OnceLock<serde_json::Value>,
}

/// A body that did not match the shape a caller asked for.
///
/// Holds the parsed JSON when the body was JSON, or the body text as a JSON
/// string when it was not.
#[derive(Debug, Clone, PartialEq)]
pub struct RawJson(pub serde_json::Value);

impl RequestOutcome {
    /// Build an outcome from a completed exchange.
    pub const fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>, attempts: u32) -> Self {
        Self {
            status,
            headers,
            body,
            attempts,
            json: OnceLock::new(),
        }
    }

    /// Response status.
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Response status as an integer.
    pub const fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Response headers. Lookups are case-insensitive and repeated
    /// headers keep their order.
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of header `name`, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Raw body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consume the outcome and return the body bytes.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Number of attempts that produced this outcome (1 when no retry ran).
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Body parsed as JSON, cached after the first successful parse.
    ///
    /// # Errors
    ///
    /// Returns the parse error if the body is not valid JSON. Failed parses
    /// are not cached.
    pub fn json(&self) -> Result<&serde_json::Value, serde_json::Error> {
        if let Some(value) = self.json.get() {
            return Ok(value);
        }
        let parsed: serde_json::Value = serde_json::from_slice(&self.body)?;
        Ok(self.json.get_or_init(|| parsed))
    }

    /// Body deserialized into `T`.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error if the body is not JSON of shape `T`.
    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(self.json()?)
    }

    /// Body deserialized into `T`, or the raw JSON when it does not fit.
    ///
    /// # Errors
    ///
    /// Returns [`RawJson`] carrying whatever the body held, so the caller
    /// decides whether a shape mismatch is fatal.
    pub fn validate<T: DeserializeOwned>(&self) -> Result<T, RawJson> {
        match self.json() {
            Ok(value) => T::deserialize(value)
                .ok()
                .ok_or_else(|| RawJson(value.clone())),
            Err(_) => Err(RawJson(serde_json::Value::String(
                self.text_lossy().into_owned(),
            ))),
        }
    }

    /// Body decoded as strict UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`Utf8Error`] on invalid byte sequences.
    pub fn text(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    /// Body decoded as UTF-8 with invalid sequences replaced.
    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::{CONTENT_TYPE, HeaderValue};
    use serde::Deserialize;

    use super::*;

    fn outcome(body: &[u8]) -> RequestOutcome {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.append("x-trace", HeaderValue::from_static("a"));
        headers.append("x-trace", HeaderValue::from_static("b"));
        RequestOutcome::new(StatusCode::OK, headers, body.to_vec(), 1)
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Hit {
        id: u32,
    }

    #[test]
    fn json_is_cached() {
        let out = outcome(br#"{"id": 7}"#);
        let first = out.json().map(std::ptr::from_ref);
        let second = out.json().map(std::ptr::from_ref);
        assert!(first.is_ok());
        assert_eq!(first.ok(), second.ok());
    }

    #[test]
    fn json_error_for_non_json_body() {
        let out = outcome(b"<html>");
        assert!(out.json().is_err());
        assert!(out.json_as::<Hit>().is_err());
    }

    #[test]
    fn validate_returns_shape_or_raw() {
        let out = outcome(br#"{"id": 7}"#);
        assert_eq!(out.validate::<Hit>(), Ok(Hit { id: 7 }));

        let out = outcome(br#"{"name": "x"}"#);
        assert_eq!(
            out.validate::<Hit>(),
            Err(RawJson(serde_json::json!({"name": "x"})))
        );

        let out = outcome(b"plain");
        assert_eq!(
            out.validate::<Hit>(),
            Err(RawJson(serde_json::Value::String("plain".to_owned())))
        );
    }

    #[test]
    fn headers_are_case_insensitive_multimap() {
        let out = outcome(b"{}");
        assert_eq!(out.header("Content-Type"), Some("application/json"));
        let traces: Vec<_> = out.headers().get_all("X-TRACE").iter().collect();
        assert_eq!(traces.len(), 2);
    }

    #[test]
    fn text_decoding() {
        let out = outcome("héllo".as_bytes());
        assert_eq!(out.text().ok(), Some("héllo"));

        let bad = outcome(&[0x66, 0xff, 0x6f]);
        assert!(bad.text().is_err());
        assert_eq!(bad.text_lossy(), "f\u{fffd}o");
    }
}
