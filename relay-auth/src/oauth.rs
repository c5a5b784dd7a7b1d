//! OAuth2 client-credentials session with a cached, single-flight refresh.
//!
//! The fast path reads the cached token under an `RwLock` and never
//! touches the refresh lock while `now + buffer` is inside the expiry.
//! Stale callers serialize on the refresh mutex; whoever gets it first
//! refreshes, the rest find a fresh cache on re-check and piggy-back.
//!
//! The session owns its own HTTP client: the token endpoint gets tighter
//! timeouts than the sink endpoint and must not inherit its retry
//! handling.

use std::time::Duration;

use relay_common::{RelayError, Result};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use url::Url;

const TOKEN_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_EXPIRES_IN_SECS: u64 = 3_600;

pub struct OAuth2Session {
    token_url: Url,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    /// Tokens are considered stale this long before their actual expiry.
    buffer: Duration,
    http: Client,
    cache: RwLock<Option<CachedToken>>,
    refresh_lock: Mutex<()>,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

impl OAuth2Session {
    pub fn new(
        token_url: String,
        client_id: String,
        client_secret: String,
        scope: Option<String>,
        buffer: Duration,
    ) -> Result<Self> {
        let token_url = Url::parse(&token_url)
            .map_err(|e| RelayError::Config(format!("auth.token_url is not a valid URL: {e}")))?;
        let http = Client::builder()
            .connect_timeout(TOKEN_CONNECT_TIMEOUT)
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RelayError::Config(format!("token http client init failed: {e}")))?;
        Ok(Self {
            token_url,
            client_id,
            client_secret,
            scope,
            buffer,
            http,
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    /// A fresh `Bearer <token>` Authorization value.
    ///
    /// Guarantees on return: the token's cached expiry is beyond
    /// `now + buffer`, or a refresh just failed while an unexpired token
    /// was still cached (degraded mode, logged) and that token is
    /// returned instead.
    pub async fn bearer(&self) -> Result<String> {
        if let Some(token) = self.fresh_from_cache().await {
            return Ok(bearer_value(&token));
        }

        let _refresh = self.refresh_lock.lock().await;
        // A concurrent caller may have refreshed while we waited.
        if let Some(token) = self.fresh_from_cache().await {
            return Ok(bearer_value(&token));
        }

        match self.fetch_token().await {
            Ok(token) => {
                let value = bearer_value(&token.access_token);
                *self.cache.write().await = Some(token);
                Ok(value)
            }
            Err(e) => {
                // Degrade onto a token that is stale per the buffer but
                // not actually expired yet.
                let now = Instant::now();
                if let Some(cached) = self.cache.read().await.as_ref() {
                    if now < cached.expires_at {
                        tracing::warn!(error = %e, "token refresh failed, reusing unexpired token");
                        return Ok(bearer_value(&cached.access_token));
                    }
                }
                Err(e)
            }
        }
    }

    async fn fresh_from_cache(&self) -> Option<String> {
        let cache = self.cache.read().await;
        let cached = cache.as_ref()?;
        if Instant::now() + self.buffer < cached.expires_at {
            Some(cached.access_token.clone())
        } else {
            None
        }
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "client_credentials"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope));
        }

        let response = self
            .http
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| RelayError::Auth(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Auth(format!(
                "token endpoint returned {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Auth(format!("token response did not parse: {e}")))?;
        if token.access_token.is_empty() {
            return Err(RelayError::Auth("token endpoint returned an empty access_token".into()));
        }

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS));
        tracing::debug!(expires_in_s = lifetime.as_secs(), "token refreshed");
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }
}

fn bearer_value(token: &str) -> String {
    format!("Bearer {token}")
}
