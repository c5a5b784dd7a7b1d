//! Typed configuration schema and startup validation.
//!
//! Defaults follow the documented option table; [`RelayConfig::validate`]
//! enforces the cross-field rules so a broken deployment fails at task
//! start instead of on the first record.

use relay_common::RelayError;
use serde::Deserialize;
use std::collections::BTreeMap;
use url::Url;

/// Immutable, validated sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub headers: HeaderForwardConfig,
    #[serde(default)]
    pub response: ResponseTopicConfig,
    #[serde(default)]
    pub errors: ErrorTopicConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub behaviour: BehaviourConfig,
    pub broker: BrokerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Target URL every record is sent to.
    pub url: String,
    #[serde(default = "default_method")]
    pub method: HttpMethod,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub max_connections_per_host: Option<usize>,
    /// The HTTP stack pools per host; this acts as an extra cap on the
    /// per-host pool rather than a process-wide limit.
    #[serde(default)]
    pub max_connections_total: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    #[default]
    Header,
    Query,
}

/// Authentication scheme, tagged by `type`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
    Apikey {
        #[serde(default)]
        location: ApiKeyLocation,
        name: String,
        value: String,
    },
    Oauth2 {
        token_url: String,
        client_id: String,
        client_secret: String,
        #[serde(default)]
        scope: Option<String>,
        /// Tokens are refreshed this many seconds before their expiry.
        #[serde(default = "default_token_buffer_seconds")]
        buffer_seconds: u64,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeaderForwardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Glob list; empty means every header passes the include step.
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub prefix: String,
    /// Always-attached headers; they win on name collisions.
    #[serde(default, rename = "static")]
    pub static_headers: BTreeMap<String, String>,
}

impl Default for HeaderForwardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include: Vec::new(),
            exclude: Vec::new(),
            prefix: String::new(),
            static_headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    #[default]
    String,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseTopicConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Topic name template; `${topic}` substitutes the source topic.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub include_original_key: bool,
    #[serde(default = "default_true")]
    pub include_original_headers: bool,
    /// Whitelist for forwarded original headers; empty means all.
    #[serde(default)]
    pub original_headers_include: Vec<String>,
    #[serde(default = "default_true")]
    pub include_request_metadata: bool,
    #[serde(default)]
    pub value_format: ValueFormat,
}

impl Default for ResponseTopicConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: None,
            include_original_key: true,
            include_original_headers: true,
            original_headers_include: Vec::new(),
            include_request_metadata: true,
            value_format: ValueFormat::String,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorTopicConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_retry_status_codes")]
    pub on_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            on_status_codes: default_retry_status_codes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullValueMode {
    #[default]
    Fail,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    #[default]
    Fail,
    Log,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BehaviourConfig {
    #[serde(default)]
    pub on_null_value: NullValueMode,
    #[serde(default)]
    pub on_error: ErrorMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub bootstrap_servers: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Source topics the consumer subscribes to.
    pub topics: Vec<String>,
    #[serde(default = "default_max_batch_records")]
    pub max_batch_records: usize,
    /// How long the host keeps draining after the first record of a batch.
    #[serde(default = "default_batch_linger_ms")]
    pub batch_linger_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_method() -> HttpMethod {
    HttpMethod::Post
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_token_buffer_seconds() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_initial_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_retry_status_codes() -> Vec<u16> {
    vec![408, 429, 500, 502, 503, 504]
}
fn default_group_id() -> String {
    "relay-http-sink".to_string()
}
fn default_max_batch_records() -> usize {
    64
}
fn default_batch_linger_ms() -> u64 {
    100
}

const MINIMUM_TIMEOUT_MS: u64 = 1_000;

fn fail(msg: impl Into<String>) -> RelayError {
    RelayError::Config(msg.into())
}

impl RelayConfig {
    /// Enforce the cross-field rules the schema cannot express.
    ///
    /// Every violation names the offending key so operators can fix the
    /// deployment without reading source.
    pub fn validate(&self) -> relay_common::Result<()> {
        let url = Url::parse(&self.endpoint.url)
            .map_err(|e| fail(format!("endpoint.url is not a valid URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(fail(format!(
                "endpoint.url must be http or https, got {}",
                url.scheme()
            )));
        }
        if self.endpoint.connect_timeout_ms < MINIMUM_TIMEOUT_MS {
            return Err(fail(format!(
                "endpoint.connect_timeout_ms must be at least {MINIMUM_TIMEOUT_MS}"
            )));
        }
        if self.endpoint.request_timeout_ms < MINIMUM_TIMEOUT_MS {
            return Err(fail(format!(
                "endpoint.request_timeout_ms must be at least {MINIMUM_TIMEOUT_MS}"
            )));
        }

        match &self.auth {
            AuthConfig::Apikey { name, .. } if name.trim().is_empty() => {
                return Err(fail("auth.name must not be empty for api-key auth"));
            }
            AuthConfig::Oauth2 { token_url, .. } => {
                Url::parse(token_url)
                    .map_err(|e| fail(format!("auth.token_url is not a valid URL: {e}")))?;
            }
            _ => {}
        }

        if self.response.enabled
            && self.response.name.as_deref().map_or(true, |n| n.trim().is_empty())
        {
            return Err(fail("response.name is required when response.enabled is true"));
        }
        if self.errors.enabled
            && self.errors.name.as_deref().map_or(true, |n| n.trim().is_empty())
        {
            return Err(fail("errors.name is required when errors.enabled is true"));
        }

        if self.retry.max_attempts < 1 {
            return Err(fail("retry.max_attempts must be at least 1"));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(fail("retry.backoff_multiplier must be >= 1.0"));
        }
        if self.retry.backoff_max_ms < self.retry.backoff_initial_ms {
            return Err(fail(
                "retry.backoff_max_ms must not be smaller than retry.backoff_initial_ms",
            ));
        }

        if self.broker.bootstrap_servers.trim().is_empty() {
            return Err(fail("broker.bootstrap_servers must not be empty"));
        }
        if self.broker.topics.is_empty() {
            return Err(fail("broker.topics must list at least one source topic"));
        }
        if self.broker.max_batch_records == 0 {
            return Err(fail("broker.max_batch_records must be at least 1"));
        }

        Ok(())
    }
}
