//! Request credentials.
//!
//! A closed set of schemes, so a sum type with one `materialize`
//! operation instead of a provider trait. Static schemes precompute
//! their header at construction; OAuth2 delegates to a cached,
//! single-flight [`OAuth2Session`].
//!
//! Credential values never appear in logs or error messages.

use base64::Engine;
use relay_common::Result;
use relay_config::{ApiKeyLocation, AuthConfig};
use std::time::Duration;

pub mod oauth;

pub use oauth::OAuth2Session;

/// What gets attached to one outbound request.
#[derive(Debug, Clone, Default)]
pub struct AuthMaterial {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

pub enum Credentials {
    None,
    /// Precomputed `Basic base64(user:pass)` Authorization value.
    Basic { header: String },
    Bearer { header: String },
    ApiKeyHeader { name: String, value: String },
    /// Sent only as a query parameter, never as a header.
    ApiKeyQuery { name: String, value: String },
    OAuth2(OAuth2Session),
}

impl Credentials {
    pub fn from_config(cfg: &AuthConfig) -> Result<Self> {
        Ok(match cfg {
            AuthConfig::None => Credentials::None,
            AuthConfig::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                Credentials::Basic {
                    header: format!("Basic {encoded}"),
                }
            }
            AuthConfig::Bearer { token } => Credentials::Bearer {
                header: format!("Bearer {token}"),
            },
            AuthConfig::Apikey {
                location,
                name,
                value,
            } => match location {
                ApiKeyLocation::Header => Credentials::ApiKeyHeader {
                    name: name.clone(),
                    value: value.clone(),
                },
                ApiKeyLocation::Query => Credentials::ApiKeyQuery {
                    name: name.clone(),
                    value: value.clone(),
                },
            },
            AuthConfig::Oauth2 {
                token_url,
                client_id,
                client_secret,
                scope,
                buffer_seconds,
            } => Credentials::OAuth2(OAuth2Session::new(
                token_url.clone(),
                client_id.clone(),
                client_secret.clone(),
                scope.clone(),
                Duration::from_secs(*buffer_seconds),
            )?),
        })
    }

    /// Headers and query params for the next attempt.
    ///
    /// Static schemes cannot fail; OAuth2 may need a token refresh and
    /// surfaces an auth fault when no usable token can be obtained.
    pub async fn materialize(&self) -> Result<AuthMaterial> {
        let material = match self {
            Credentials::None => AuthMaterial::default(),
            Credentials::Basic { header } | Credentials::Bearer { header } => AuthMaterial {
                headers: vec![("Authorization".to_string(), header.clone())],
                ..AuthMaterial::default()
            },
            Credentials::ApiKeyHeader { name, value } => AuthMaterial {
                headers: vec![(name.clone(), value.clone())],
                ..AuthMaterial::default()
            },
            Credentials::ApiKeyQuery { name, value } => AuthMaterial {
                query: vec![(name.clone(), value.clone())],
                ..AuthMaterial::default()
            },
            Credentials::OAuth2(session) => AuthMaterial {
                headers: vec![("Authorization".to_string(), session.bearer().await?)],
                ..AuthMaterial::default()
            },
        };
        Ok(material)
    }
}
