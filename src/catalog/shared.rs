//! Process-wide HTTP client
//!
//! One `reqwest::Client` serves the identity, catalog and object hosts so the
//! connection pool is shared by every search and transfer. Only the connect
//! phase is bounded here: token and search calls set a per-request timeout,
//! while downloads bound the gap between chunks instead of the whole body.

use once_cell::sync::Lazy;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// HTTP connect timeout (seconds) - time to establish TCP connection
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Idle pooled connections are closed after this long.
const HTTP_POOL_IDLE_TIMEOUT_SECS: u64 = 90;

static GLOBAL_HTTP_CLIENT: Lazy<Arc<Client>> = Lazy::new(|| {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .pool_idle_timeout(Duration::from_secs(HTTP_POOL_IDLE_TIMEOUT_SECS))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build tuned HTTP client, using defaults");
            Client::new()
        });
    Arc::new(client)
});

/// Get the global HTTP client
///
/// Returns a clone of the Arc, which is cheap (just increments ref count)
pub fn global_http_client() -> Arc<Client> {
    GLOBAL_HTTP_CLIENT.clone()
}
