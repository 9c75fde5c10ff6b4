//! Remote request plumbing.
//!
//! A [`Transport`] issues one GET-style request carrying flat query
//! parameters and yields the parsed JSON payload. [`timed_request`] wraps
//! any transport so that the first of {response, timeout} settles the call.

mod http;
mod script;

pub use http::HttpTransport;
pub use script::{CallbackIds, ScriptHost, ScriptTagTransport};

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{TransportError, TransportResult};

/// A request parameter: a single value or a list expanded into repeated pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Scalar(String),
    List(Vec<String>),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Scalar(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Scalar(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(values: Vec<String>) -> Self {
        ParamValue::List(values)
    }
}

/// Ordered request parameters. Setting an existing key replaces its value
/// in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    entries: Vec<(String, ParamValue)>,
}

impl QueryParams {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no keys are set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flattened `(key, value)` pairs, lists expanded in order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|(key, value)| {
            let values: Vec<&str> = match value {
                ParamValue::Scalar(v) => vec![v.as_str()],
                ParamValue::List(vs) => vs.iter().map(String::as_str).collect(),
            };
            values.into_iter().map(move |v| (key.as_str(), v))
        })
    }
}

/// Build `endpoint?k=v&...`; the endpoint is returned unchanged when no
/// pairs result.
pub fn build_uri(endpoint: &str, params: &QueryParams) -> String {
    let query: Vec<String> = params
        .pairs()
        .map(|(key, value)| format!("{}={}", encode_component(key), encode_component(value)))
        .collect();

    if query.is_empty() {
        endpoint.to_string()
    } else {
        format!("{}?{}", endpoint, query.join("&"))
    }
}

/// Percent-encode everything except `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
pub fn encode_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Capability to issue a request against a remote endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue the request and resolve with the parsed response payload.
    ///
    /// `timeout` is advisory for the implementation; callers enforce it via
    /// [`timed_request`].
    async fn request(
        &self,
        uri: &str,
        params: &QueryParams,
        timeout: Duration,
    ) -> TransportResult<Value>;
}

/// Issue a request that settles exactly once: with the response, or with
/// [`TransportError::Timeout`] when `timeout` elapses first.
pub async fn timed_request(
    transport: &dyn Transport,
    uri: &str,
    params: &QueryParams,
    timeout: Duration,
) -> TransportResult<Value> {
    match tokio::time::timeout(timeout, transport.request(uri, params, timeout)).await {
        Ok(result) => result,
        Err(_) => {
            debug!(uri = %uri, timeout_ms = timeout.as_millis(), "Request abandoned after timeout");
            Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct NeverResponds;

    #[async_trait]
    impl Transport for NeverResponds {
        async fn request(
            &self,
            _uri: &str,
            _params: &QueryParams,
            _timeout: Duration,
        ) -> TransportResult<Value> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_build_uri_without_params() {
        assert_eq!(
            build_uri("https://ab.cnstrc.com/participate", &QueryParams::new()),
            "https://ab.cnstrc.com/participate"
        );
    }

    #[test]
    fn test_build_uri_expands_lists_in_order() {
        let params = QueryParams::new()
            .with("client_id", "abc")
            .with("experiment", "show bieber")
            .with(
                "alternatives",
                vec!["trolled".to_string(), "not-trolled".to_string()],
            );

        assert_eq!(
            build_uri("/participate", &params),
            "/participate?client_id=abc&experiment=show%20bieber&alternatives=trolled&alternatives=not-trolled"
        );
    }

    #[test]
    fn test_build_uri_with_empty_list_only() {
        let params = QueryParams::new().with("alternatives", Vec::<String>::new());
        assert_eq!(build_uri("/participate", &params), "/participate");
    }

    #[test]
    fn test_encode_component() {
        assert_eq!(encode_component("a b&c=d"), "a%20b%26c%3Dd");
        assert_eq!(encode_component("Mozilla/5.0 (X11)"), "Mozilla%2F5.0%20(X11)");
        assert_eq!(encode_component("\u{2713}"), "%E2%9C%93");
        assert_eq!(encode_component("-_.!~*'()"), "-_.!~*'()");
    }

    #[test]
    fn test_query_params_insert_replaces_in_place() {
        let mut params = QueryParams::new().with("a", "1").with("b", "2");
        params.insert("a", "3");
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("a"), Some(&ParamValue::Scalar("3".to_string())));
        assert_eq!(build_uri("/", &params), "/?a=3&b=2");
    }

    #[tokio::test]
    async fn test_timed_request_times_out() {
        let result = timed_request(
            &NeverResponds,
            "/participate",
            &QueryParams::new(),
            Duration::from_millis(20),
        )
        .await;

        assert!(matches!(
            result,
            Err(TransportError::Timeout { timeout_ms: 20 })
        ));
    }
}
