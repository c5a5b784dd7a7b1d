//! Per-record request assembly.
//!
//! The body and forwarded headers are computed once per record; the
//! final [`OutboundRequest`] is rebuilt per attempt so rotated OAuth2
//! tokens take effect between retries.

use relay_auth::AuthMaterial;
use relay_codec::{encode_body, HeaderForwarder, JSON_CONTENT_TYPE};
use relay_common::{RelayError, Result, SinkRecord};
use relay_config::{EndpointConfig, HeaderForwardConfig, HttpMethod};
use relay_http::OutboundRequest;
use reqwest::Method;
use url::Url;

pub struct RequestFactory {
    method: Method,
    url: Url,
    forwarder: HeaderForwarder,
}

/// The record-dependent half of a request, valid for every attempt.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

impl RequestFactory {
    pub fn new(endpoint: &EndpointConfig, headers: &HeaderForwardConfig) -> Result<Self> {
        let url = Url::parse(&endpoint.url)
            .map_err(|e| RelayError::Config(format!("endpoint.url is not a valid URL: {e}")))?;
        Ok(Self {
            method: match endpoint.method {
                HttpMethod::Post => Method::POST,
                HttpMethod::Put => Method::PUT,
                HttpMethod::Delete => Method::DELETE,
            },
            url,
            forwarder: HeaderForwarder::new(headers)?,
        })
    }

    /// Encode the body and forward headers; conversion faults surface
    /// here, before any attempt is made.
    pub fn prepare(&self, record: &SinkRecord) -> Result<PreparedRequest> {
        Ok(PreparedRequest {
            headers: self.forwarder.forward(&record.headers),
            body: Some(encode_body(&record.value)?),
        })
    }

    /// Combine the prepared record data with this attempt's credentials.
    /// Credential headers replace forwarded ones of the same name.
    pub fn build(&self, prepared: &PreparedRequest, auth: AuthMaterial) -> OutboundRequest {
        let mut headers = prepared.headers.clone();
        for (name, value) in auth.headers {
            match headers
                .iter_mut()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
            {
                Some(entry) => *entry = (name, value),
                None => headers.push((name, value)),
            }
        }
        OutboundRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers,
            query: auth.query,
            body: prepared.body.clone(),
            content_type: JSON_CONTENT_TYPE.to_string(),
        }
    }
}
