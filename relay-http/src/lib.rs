//! One-attempt HTTP execution with safe logging.
//!
//! - [`EndpointClient`] wraps a pooled `reqwest` client: connect/request
//!   timeouts, per-host connection caps, and a redirect policy that only
//!   follows same-scheme or upgrade-to-HTTPS hops.
//! - One call to [`EndpointClient::send`] is exactly one attempt; the
//!   retry loop lives with the caller, driven by [`RetryPolicy`].
//! - Authorization headers and credential-bearing query params are never
//!   logged; events carry a per-request id instead.

use std::time::{Duration, Instant};

use relay_common::{RelayError, TransportError, TransportKind};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{redirect, Client, Method, Url};
use uuid::Uuid;

pub mod retry;

pub use retry::RetryPolicy;

const MAX_REDIRECT_HOPS: usize = 10;

/// Everything needed to issue one attempt.
///
/// Rebuilt per attempt by the caller so rotating credentials (OAuth2)
/// take effect between attempts.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    /// Name/value pairs; names are matched case-insensitively by HTTP.
    pub headers: Vec<(String, String)>,
    /// Extra query parameters appended to the URL (api-key(query) auth).
    pub query: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Applied as `Content-Type` when a body is present and no header
    /// already claims the name.
    pub content_type: String,
}

/// Outcome of one attempt that produced a status line.
#[derive(Debug, Clone)]
pub struct EndpointResponse {
    pub status: u16,
    /// Name → last value, as the response carried them.
    pub headers: Vec<(String, String)>,
    /// UTF-8 body, `None` when the response body was empty.
    pub body: Option<String>,
    pub elapsed_ms: u64,
}

impl EndpointResponse {
    /// "Non-error" in the pipeline's sense: a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Connection tuning for [`EndpointClient::new`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_connections_per_host: Option<usize>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_connections_per_host: None,
        }
    }
}

#[derive(Clone)]
pub struct EndpointClient {
    inner: Client,
}

impl EndpointClient {
    /// Build the pooled client. Fails only on stack misconfiguration,
    /// which is a startup problem, not a per-record one.
    pub fn new(opts: ClientOptions) -> Result<Self, RelayError> {
        let mut builder = Client::builder()
            .connect_timeout(opts.connect_timeout)
            .timeout(opts.request_timeout)
            .redirect(scheme_preserving_redirects());
        if let Some(cap) = opts.max_connections_per_host {
            builder = builder.pool_max_idle_per_host(cap);
        }
        let inner = builder
            .build()
            .map_err(|e| RelayError::Config(format!("http client init failed: {e}")))?;
        Ok(Self { inner })
    }

    /// Execute exactly one attempt.
    ///
    /// Any failure below the status-code layer comes back as a
    /// [`TransportError`]; a response with any status (including 4xx/5xx)
    /// is an `Ok`.
    pub async fn send(&self, request: &OutboundRequest) -> Result<EndpointResponse, TransportError> {
        let req_id = Uuid::new_v4();
        let headers = build_header_map(request)?;

        let mut rb = self
            .inner
            .request(request.method.clone(), request.url.clone())
            .headers(headers);
        if !request.query.is_empty() {
            rb = rb.query(&request.query);
        }
        if let Some(body) = &request.body {
            rb = rb.body(body.clone());
        }

        tracing::debug!(
            req_id = %req_id,
            method = %request.method,
            host_path = %host_path(&request.url),
            query = ?redacted_query(&request.query),
            has_body = request.body.is_some(),
            "http.request.start"
        );

        let started = Instant::now();
        let response = rb.send().await.map_err(|e| {
            let fault = classify(&e);
            tracing::warn!(req_id = %req_id, kind = %fault.kind, message = %fault.message, "http.transport_error");
            fault
        })?;

        let status = response.status().as_u16();
        let response_headers = last_value_headers(response.headers());
        let text = response.text().await.map_err(|e| {
            let fault = classify(&e);
            tracing::warn!(req_id = %req_id, kind = %fault.kind, message = %fault.message, "http.transport_error.body");
            fault
        })?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::debug!(
            req_id = %req_id,
            status,
            elapsed_ms,
            body_len = text.len(),
            "http.response"
        );

        Ok(EndpointResponse {
            status,
            headers: response_headers,
            body: if text.is_empty() { None } else { Some(text) },
            elapsed_ms,
        })
    }
}

/// Follow redirects that stay on the same scheme, or upgrade to HTTPS;
/// downgrades and scheme changes stop the chain.
fn scheme_preserving_redirects() -> redirect::Policy {
    redirect::Policy::custom(|attempt| {
        if attempt.previous().len() > MAX_REDIRECT_HOPS {
            return attempt.error("too many redirects");
        }
        let next_is_https = attempt.url().scheme() == "https";
        let same_scheme = attempt
            .previous()
            .last()
            .map(|prev| prev.scheme() == attempt.url().scheme());
        match same_scheme {
            Some(true) | None => attempt.follow(),
            Some(false) if next_is_https => attempt.follow(),
            Some(false) => attempt.stop(),
        }
    })
}

fn build_header_map(request: &OutboundRequest) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            TransportError::new(TransportKind::Other, format!("invalid header name {name:?}: {e}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            TransportError::new(TransportKind::Other, format!("invalid value for header {name}: {e}"))
        })?;
        map.append(name, value);
    }
    if request.body.is_some() && !map.contains_key(CONTENT_TYPE) {
        let value = HeaderValue::from_str(&request.content_type).map_err(|e| {
            TransportError::new(TransportKind::Other, format!("invalid content type: {e}"))
        })?;
        map.insert(CONTENT_TYPE, value);
    }
    Ok(map)
}

fn last_value_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        match out.iter_mut().find(|(n, _)| n == name.as_str()) {
            Some((_, existing)) => *existing = value.to_string(),
            None => out.push((name.as_str().to_string(), value.to_string())),
        }
    }
    out
}

fn classify(e: &reqwest::Error) -> TransportError {
    let kind = if e.is_timeout() {
        TransportKind::Timeout
    } else if e.is_connect() {
        TransportKind::Connect
    } else if e.is_body() || e.is_decode() || e.is_request() {
        TransportKind::Io
    } else {
        TransportKind::Other
    };
    TransportError::new(kind, e.to_string())
}

fn host_path(url: &Url) -> String {
    format!("{}{}", url.host_str().unwrap_or("-"), url.path())
}

/// Query params that smell like credentials are masked in logs.
fn redacted_query(query: &[(String, String)]) -> Vec<(String, String)> {
    query
        .iter()
        .map(|(k, v)| {
            let is_secret = matches!(
                k.to_ascii_lowercase().as_str(),
                "access_token"
                    | "authorization"
                    | "auth"
                    | "key"
                    | "api_key"
                    | "token"
                    | "secret"
                    | "client_secret"
                    | "bearer"
            );
            (
                k.clone(),
                if is_secret { "<redacted>".to_string() } else { v.clone() },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_window_is_2xx() {
        let mut resp = EndpointResponse {
            status: 200,
            headers: vec![],
            body: None,
            elapsed_ms: 1,
        };
        assert!(resp.is_success());
        resp.status = 204;
        assert!(resp.is_success());
        resp.status = 302;
        assert!(!resp.is_success());
        resp.status = 503;
        assert!(!resp.is_success());
    }

    #[test]
    fn credential_query_params_are_masked() {
        let q = vec![
            ("api_key".to_string(), "k".to_string()),
            ("page".to_string(), "2".to_string()),
        ];
        let red = redacted_query(&q);
        assert_eq!(red[0].1, "<redacted>");
        assert_eq!(red[1].1, "2");
    }

    #[test]
    fn content_type_yields_to_caller_headers() {
        let request = OutboundRequest {
            method: Method::POST,
            url: Url::parse("http://localhost/x").unwrap(),
            headers: vec![("Content-Type".into(), "text/plain".into())],
            query: vec![],
            body: Some(b"{}".to_vec()),
            content_type: "application/json".into(),
        };
        let map = build_header_map(&request).unwrap();
        assert_eq!(map.get(CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[test]
    fn default_content_type_is_attached_with_a_body() {
        let request = OutboundRequest {
            method: Method::POST,
            url: Url::parse("http://localhost/x").unwrap(),
            headers: vec![],
            query: vec![],
            body: Some(b"{}".to_vec()),
            content_type: "application/json".into(),
        };
        let map = build_header_map(&request).unwrap();
        assert_eq!(map.get(CONTENT_TYPE).unwrap(), "application/json");

        let bodyless = OutboundRequest {
            body: None,
            ..request
        };
        assert!(!build_header_map(&bodyless).unwrap().contains_key(CONTENT_TYPE));
    }
}
