//! Authenticated request execution shared by search and download
//!
//! [`CatalogHttpClient`] attaches the bearer token, re-authenticates once when
//! the server answers 401, and retries 429/5xx responses and connection
//! failures with exponential backoff. Backoff sleeps are interrupted by the
//! cancellation signal.

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::retry::{FailureClass, RetryContext};
use super::shared::global_http_client;
use crate::auth::TokenManager;
use crate::downloader::config::RetryPolicy;
use crate::error::{ClientError, ClientResult};
use crate::metrics::{record_retry_backoff, HttpRequestMetrics};
use crate::shutdown::{self, SharedCancellation};

/// Longest error body kept in [`ClientError::Http`].
const MAX_ERROR_BODY_CHARS: usize = 300;

/// HTTP client that speaks to the catalog and object API on behalf of a session
pub struct CatalogHttpClient {
    client: Arc<Client>,
    tokens: Arc<TokenManager>,
    retry: RetryPolicy,
    cancellation: SharedCancellation,
}

impl CatalogHttpClient {
    /// Create a client for `tokens`' session, using the shared HTTP client,
    /// the session's retry policy and the process-wide cancellation signal.
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        let retry = tokens.config().retry;
        Self {
            client: global_http_client(),
            tokens,
            retry,
            cancellation: shutdown::global_or_detached(),
        }
    }

    /// Use a specific HTTP client.
    pub fn with_client(mut self, client: Arc<Client>) -> Self {
        self.client = client;
        self
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Observe a specific cancellation signal.
    pub fn with_cancellation(mut self, cancellation: SharedCancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Session token manager
    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Retry policy in effect
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Cancellation signal observed by this client
    pub fn cancellation(&self) -> &SharedCancellation {
        &self.cancellation
    }

    /// Send an authenticated request built by `build`, retrying as needed.
    ///
    /// `operation` labels metrics, `subject` (e.g. `page 3` or a product id)
    /// labels log lines and `url` is reported in errors.
    ///
    /// Returns the response for 2xx statuses and for 416, whose meaning
    /// depends on the Range header the caller sent.
    ///
    /// # Errors
    /// - [`ClientError::Auth`] when a 401 persists after one re-authentication, or on 403
    /// - [`ClientError::Transient`] when 429/5xx persist through every attempt
    /// - [`ClientError::Network`] when connection failures, to this host or the
    ///   identity host, persist through every attempt
    /// - [`ClientError::Http`] for any other 4xx
    /// - [`ClientError::Cancelled`] when cancellation fires during a backoff
    pub async fn send_authorized<F>(
        &self,
        operation: &'static str,
        subject: &str,
        url: &str,
        build: F,
    ) -> ClientResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut failures: u32 = 0;
        let mut requests: u32 = 0;
        let mut reauthenticated = false;

        loop {
            if self.cancellation.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            let token = match self.tokens.get_valid_token().await {
                Ok(token) => token,
                Err(ClientError::Network { endpoint, message }) => {
                    failures += 1;
                    let ctx = RetryContext::new(subject, endpoint.as_str())
                        .attempt(failures, max_attempts)
                        .failed_with(FailureClass::Unreachable, message.as_str())
                        .waiting(self.retry.backoff(failures - 1));
                    if failures >= max_attempts {
                        warn!("{}", ctx.format_failure());
                        return Err(ClientError::Network { endpoint, message });
                    }
                    self.backoff(&ctx).await?;
                    continue;
                }
                Err(err) => return Err(err),
            };
            requests += 1;
            let request_metrics = HttpRequestMetrics::start(operation, requests);

            let response = match build(&self.client).bearer_auth(&token).send().await {
                Ok(response) => response,
                Err(err) => {
                    request_metrics.record_network_error();
                    failures += 1;
                    let ctx = RetryContext::new(subject, url)
                        .attempt(failures, max_attempts)
                        .failed_with(FailureClass::classify(None, Some(&err)), err.to_string())
                        .waiting(self.retry.backoff(failures - 1));
                    if failures >= max_attempts {
                        warn!("{}", ctx.format_failure());
                        return Err(ClientError::Network {
                            endpoint: url.to_string(),
                            message: err.to_string(),
                        });
                    }
                    self.backoff(&ctx).await?;
                    continue;
                }
            };

            let status = response.status();
            request_metrics.record_complete(status.as_u16());

            if status == StatusCode::UNAUTHORIZED {
                if reauthenticated {
                    return Err(ClientError::Auth {
                        status: Some(401),
                        reason: format!("{operation} request still rejected after re-authentication"),
                    });
                }
                reauthenticated = true;
                info!(operation, subject, "Access token rejected, re-authenticating once");
                self.tokens.invalidate(&token).await;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                failures += 1;
                let mut wait = self.retry.backoff(failures - 1);
                if let Some(hint) = retry_after(&response) {
                    wait = wait.max(hint).min(self.retry.max_backoff);
                }
                let ctx = RetryContext::new(subject, url)
                    .attempt(failures, max_attempts)
                    .failed_with(FailureClass::classify(Some(status), None), format!("HTTP {status}"))
                    .waiting(wait);
                if failures >= max_attempts {
                    warn!("{}", ctx.format_failure());
                    return Err(ClientError::Transient {
                        status: status.as_u16(),
                        endpoint: url.to_string(),
                        attempts: failures,
                    });
                }
                self.backoff(&ctx).await?;
                continue;
            }

            if status == StatusCode::FORBIDDEN {
                let body = read_error_body(response).await;
                return Err(ClientError::Auth {
                    status: Some(403),
                    reason: body,
                });
            }

            if status.is_client_error() && status != StatusCode::RANGE_NOT_SATISFIABLE {
                let body = read_error_body(response).await;
                return Err(ClientError::Http {
                    status: status.as_u16(),
                    endpoint: url.to_string(),
                    body,
                });
            }

            if failures > 0 {
                let ctx = RetryContext::new(subject, url).attempt(failures + 1, max_attempts);
                info!("{}", ctx.format_success());
            }
            debug!(operation, subject, status = status.as_u16(), "Request succeeded");
            return Ok(response);
        }
    }

    /// GET `url` and decode the body as JSON.
    ///
    /// A body that is not valid JSON yields [`ClientError::Parse`] with
    /// `subject` as context.
    pub async fn get_json(
        &self,
        operation: &'static str,
        subject: &str,
        url: &Url,
        timeout: Duration,
    ) -> ClientResult<serde_json::Value> {
        let response = self
            .send_authorized(operation, subject, url.as_str(), |client| {
                client.get(url.clone()).timeout(timeout)
            })
            .await?;

        let body = response.text().await.map_err(|e| ClientError::Network {
            endpoint: url.to_string(),
            message: e.to_string(),
        })?;

        serde_json::from_str(&body).map_err(|e| ClientError::Parse {
            context: subject.to_string(),
            message: format!("invalid JSON: {e}"),
        })
    }

    async fn backoff(&self, ctx: &RetryContext) -> ClientResult<()> {
        warn!("{}", ctx.format_retry());
        record_retry_backoff(ctx.backoff_duration, ctx.attempt);
        tokio::select! {
            _ = tokio::time::sleep(ctx.backoff_duration) => Ok(()),
            _ = self.cancellation.cancelled() => {
                info!(subject = %ctx.subject, "Cancellation requested during backoff");
                Err(ClientError::Cancelled)
            }
        }
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

async fn read_error_body(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
