//! Access-token lifecycle against the Keycloak token endpoint
//!
//! [`TokenManager`] is the only owner of the session's [`TokenPair`]. The pair
//! sits behind one async mutex and every renewal happens while that mutex is
//! held, so callers arriving during a refresh wait for its result instead of
//! starting their own.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::credentials::{CredentialStore, Credentials};
use crate::catalog::shared::global_http_client;
use crate::catalog::CatalogConfig;
use crate::error::{ClientError, ClientResult};
use crate::metrics;

/// Access and refresh token issued by the identity service
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
    refresh_expires_at: Option<DateTime<Utc>>,
}

impl TokenPair {
    /// Bearer token for API calls
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// When the access token stops being accepted
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// When the refresh token stops being accepted, if the server said
    pub fn refresh_expires_at(&self) -> Option<DateTime<Utc>> {
        self.refresh_expires_at
    }

    /// Whether a refresh token was issued
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Whether the access token can still be handed out at `now` given the
    /// renewal margin.
    pub fn is_fresh(&self, now: DateTime<Utc>, skew: std::time::Duration) -> bool {
        let skew = chrono::Duration::from_std(skew).unwrap_or(chrono::Duration::zero());
        self.expires_at
            .checked_sub_signed(skew)
            .is_some_and(|deadline| now < deadline)
    }

    fn usable_refresh_token(&self, now: DateTime<Utc>) -> Option<&str> {
        match self.refresh_expires_at {
            Some(deadline) if now >= deadline => None,
            _ => self.refresh_token.as_deref(),
        }
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    refresh_expires_in: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    Password,
    Refresh,
}

impl Grant {
    fn label(&self) -> &'static str {
        match self {
            Grant::Password => "password",
            Grant::Refresh => "refresh_token",
        }
    }
}

/// Obtains, refreshes and invalidates access tokens.
pub struct TokenManager {
    client: Arc<Client>,
    config: Arc<CatalogConfig>,
    credentials: CredentialStore,
    state: Mutex<Option<TokenPair>>,
    // Bumped under `state`'s lock on every successful exchange.
    generation: AtomicU64,
}

impl TokenManager {
    /// Create a manager using the shared HTTP client.
    pub fn new(config: Arc<CatalogConfig>, credentials: CredentialStore) -> Self {
        Self::with_client(global_http_client(), config, credentials)
    }

    /// Create a manager with an explicit HTTP client.
    pub fn with_client(
        client: Arc<Client>,
        config: Arc<CatalogConfig>,
        credentials: CredentialStore,
    ) -> Self {
        Self {
            client,
            config,
            credentials,
            state: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Exchange `credentials` for a new token pair (password grant) and make
    /// it the current session.
    ///
    /// # Errors
    /// - [`ClientError::Auth`] when the server rejects the credentials; the
    ///   server's reason is embedded
    /// - [`ClientError::Network`] when the identity service is unreachable
    pub async fn acquire(&self, credentials: &Credentials) -> ClientResult<TokenPair> {
        let mut slot = self.state.lock().await;
        let pair = self.exchange(Grant::Password, Some(credentials), None).await?;
        self.store(&mut slot, pair.clone());
        Ok(pair)
    }

    /// Exchange the current refresh token for a new pair.
    ///
    /// Callers that were waiting while another refresh completed receive that
    /// refresh's result rather than issuing a second one.
    pub async fn refresh(&self) -> ClientResult<TokenPair> {
        let seen = self.generation.load(Ordering::SeqCst);
        let mut slot = self.state.lock().await;

        if self.generation.load(Ordering::SeqCst) != seen {
            if let Some(pair) = slot.as_ref() {
                debug!("Token renewed while waiting, reusing it");
                return Ok(pair.clone());
            }
        }

        let refresh_token = slot
            .as_ref()
            .and_then(|pair| pair.usable_refresh_token(Utc::now()))
            .map(str::to_string)
            .ok_or_else(|| ClientError::Auth {
                status: None,
                reason: "no usable refresh token".to_string(),
            })?;

        let pair = self
            .exchange(Grant::Refresh, None, Some(&refresh_token))
            .await?;
        self.store(&mut slot, pair.clone());
        Ok(pair)
    }

    /// Return an access token that is valid for at least the renewal margin.
    ///
    /// Refreshes transparently when the current token is stale and falls back
    /// to a full password grant when the refresh fails. Errors from that final
    /// acquire are returned as-is.
    pub async fn get_valid_token(&self) -> ClientResult<String> {
        let mut slot = self.state.lock().await;
        let now = Utc::now();

        if let Some(pair) = slot.as_ref() {
            if pair.is_fresh(now, self.config.token_skew) {
                return Ok(pair.access_token.clone());
            }
        }

        if let Some(refresh_token) = slot
            .as_ref()
            .and_then(|pair| pair.usable_refresh_token(now))
            .map(str::to_string)
        {
            match self
                .exchange(Grant::Refresh, None, Some(&refresh_token))
                .await
            {
                Ok(pair) => {
                    let token = pair.access_token.clone();
                    self.store(&mut slot, pair);
                    return Ok(token);
                }
                Err(err) => {
                    warn!(error = %err, "Token refresh failed, re-authenticating with credentials");
                }
            }
        }

        let pair = self
            .exchange(Grant::Password, Some(self.credentials.credentials()), None)
            .await?;
        let token = pair.access_token.clone();
        self.store(&mut slot, pair);
        Ok(token)
    }

    /// Mark `stale_access_token` as expired if it is still the current one.
    ///
    /// Returns whether the session was invalidated. A burst of 401 responses
    /// carrying the same token therefore causes a single renewal.
    pub async fn invalidate(&self, stale_access_token: &str) -> bool {
        let mut slot = self.state.lock().await;
        match slot.as_mut() {
            Some(pair) if pair.access_token == stale_access_token => {
                pair.expires_at = Utc::now();
                info!("Access token invalidated after rejection");
                true
            }
            _ => false,
        }
    }

    /// Configuration the manager was created with
    pub fn config(&self) -> &Arc<CatalogConfig> {
        &self.config
    }

    /// Snapshot of the current session, if any.
    pub async fn current(&self) -> Option<TokenPair> {
        self.state.lock().await.clone()
    }

    fn store(&self, slot: &mut Option<TokenPair>, pair: TokenPair) {
        *slot = Some(pair);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    async fn exchange(
        &self,
        grant: Grant,
        credentials: Option<&Credentials>,
        refresh_token: Option<&str>,
    ) -> ClientResult<TokenPair> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", grant.label()),
        ];
        if let Some(credentials) = credentials {
            form.push(("username", credentials.username()));
            form.push(("password", credentials.password()));
        }
        if let Some(token) = refresh_token {
            form.push(("refresh_token", token));
        }

        debug!(grant = grant.label(), endpoint = %self.config.identity_url, "Requesting access token");

        let response = self
            .client
            .post(&self.config.identity_url)
            .timeout(self.config.request_timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                metrics::record_token_exchange(grant.label(), false);
                ClientError::Network {
                    endpoint: self.config.identity_url.clone(),
                    message: e.to_string(),
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ClientError::Network {
            endpoint: self.config.identity_url.clone(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            metrics::record_token_exchange(grant.label(), false);
            let reason = serde_json::from_str::<TokenErrorResponse>(&body)
                .ok()
                .and_then(|e| e.error_description.or(e.error))
                .unwrap_or_else(|| truncate(&body, 200));
            return Err(ClientError::Auth {
                status: Some(status.as_u16()),
                reason,
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| ClientError::Parse {
            context: "token response".to_string(),
            message: e.to_string(),
        })?;

        let now = Utc::now();
        let pair = TokenPair {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
            expires_at: now + chrono::Duration::seconds(parsed.expires_in.max(0)),
            refresh_expires_at: parsed
                .refresh_expires_in
                .filter(|secs| *secs > 0)
                .map(|secs| now + chrono::Duration::seconds(secs)),
        };

        metrics::record_token_exchange(grant.label(), true);
        info!(
            grant = grant.label(),
            expires_in_secs = parsed.expires_in,
            "Access token issued"
        );
        Ok(pair)
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(max_chars).collect()
}
