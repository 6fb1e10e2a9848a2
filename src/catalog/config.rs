//! Endpoint and timing configuration for the Copernicus Data Space
//!
//! The service is split across three hosts:
//!
//! - **Identity** (Keycloak): <https://identity.dataspace.copernicus.eu>
//! - **Catalog** (resto OpenSearch and OData): <https://catalogue.dataspace.copernicus.eu>
//! - **Object API** (zipped product archives): <https://zipper.dataspace.copernicus.eu>
//!
//! [`CatalogConfig::for_base_url`] points all of them at one host, which is how
//! mirrors and the integration tests are wired.

use std::time::Duration;

use crate::downloader::config::{RetryPolicy, CHUNK_READ_TIMEOUT};

/// Keycloak token endpoint of the CDSE realm
pub const CDSE_IDENTITY_URL: &str =
    "https://identity.dataspace.copernicus.eu/auth/realms/CDSE/protocol/openid-connect/token";

/// resto collections root; search paths are appended to it
pub const CDSE_CATALOG_URL: &str = "https://catalogue.dataspace.copernicus.eu/resto/api/collections";

/// OData products collection used for lookups by id
pub const CDSE_ODATA_URL: &str = "https://catalogue.dataspace.copernicus.eu/odata/v1/Products";

/// OData products collection on the download host
pub const CDSE_DOWNLOAD_URL: &str = "https://zipper.dataspace.copernicus.eu/odata/v1/Products";

/// Public OAuth2 client registered for CDSE users
pub const CDSE_CLIENT_ID: &str = "cdse-public";

/// Tokens are renewed this long before their advertised expiry.
pub const DEFAULT_TOKEN_SKEW: Duration = Duration::from_secs(60);

/// Timeout for token and search requests (downloads only bound chunk gaps).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Highest result offset the search endpoint will page to.
pub const DEFAULT_RESULT_CEILING: u32 = 10_000;

/// Client configuration (endpoints, timeouts, retry policy)
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// OAuth2 token endpoint
    pub identity_url: String,
    /// Search root (`{catalog_url}/[{Collection}/]search.json`)
    pub catalog_url: String,
    /// OData products collection for lookups (`{odata_url}({id})`)
    pub odata_url: String,
    /// OData products collection for archives (`{download_url}({id})/$value`)
    pub download_url: String,
    /// OAuth2 client id
    pub client_id: String,
    /// Renewal margin before token expiry
    pub token_skew: Duration,
    /// Timeout for token and search requests
    pub request_timeout: Duration,
    /// Longest gap tolerated between two download chunks
    pub chunk_read_timeout: Duration,
    /// Offset ceiling for paginated searches
    pub result_ceiling: u32,
    /// Backoff policy for retryable failures
    pub retry: RetryPolicy,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            identity_url: CDSE_IDENTITY_URL.to_string(),
            catalog_url: CDSE_CATALOG_URL.to_string(),
            odata_url: CDSE_ODATA_URL.to_string(),
            download_url: CDSE_DOWNLOAD_URL.to_string(),
            client_id: CDSE_CLIENT_ID.to_string(),
            token_skew: DEFAULT_TOKEN_SKEW,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            chunk_read_timeout: CHUNK_READ_TIMEOUT,
            result_ceiling: DEFAULT_RESULT_CEILING,
            retry: RetryPolicy::default(),
        }
    }
}

impl CatalogConfig {
    /// Serve every endpoint from one host, using the CDSE path layout:
    ///
    /// - `{base}/auth/token`
    /// - `{base}/resto/api/collections`
    /// - `{base}/odata/v1/Products`
    /// - `{base}/download/v1/Products`
    pub fn for_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            identity_url: format!("{base}/auth/token"),
            catalog_url: format!("{base}/resto/api/collections"),
            odata_url: format!("{base}/odata/v1/Products"),
            download_url: format!("{base}/download/v1/Products"),
            ..Self::default()
        }
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the token renewal margin.
    pub fn with_token_skew(mut self, skew: Duration) -> Self {
        self.token_skew = skew;
        self
    }

    /// Replace the search offset ceiling.
    pub fn with_result_ceiling(mut self, ceiling: u32) -> Self {
        self.result_ceiling = ceiling;
        self
    }

    /// Replace the stalled-transfer timeout.
    pub fn with_chunk_read_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_read_timeout = timeout;
        self
    }

    /// OData lookup URL for one product.
    pub fn product_url(&self, product_id: &str) -> String {
        format!("{}({})", self.odata_url, product_id)
    }

    /// Archive URL for one product, used when a search result carries no
    /// download link of its own.
    pub fn download_uri(&self, product_id: &str) -> String {
        format!("{}({})/$value", self.download_url, product_id)
    }
}
