//! Command-line interface
//!
//! - `search` lists matching products, optionally into a CSV or JSON-lines file
//! - `download` fetches products found by a search or named by id
//! - `status` reports interrupted transfers in a destination directory

pub mod download;
pub mod error;
pub mod search;
pub mod status;

pub use download::DownloadArgs;
pub use error::CliError;
pub use search::SearchArgs;
pub use status::StatusArgs;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::{CredentialStore, TokenManager};
use crate::catalog::{CatalogConfig, CatalogHttpClient, SearchClient};
use crate::downloader::RetryPolicy;
use crate::shutdown::SharedCancellation;

/// Maximum allowed concurrency; the object API throttles beyond a few streams per user
const MAX_CONCURRENCY: usize = 32;

/// Copernicus Data Space downloader CLI
#[derive(Parser, Debug)]
#[command(name = "dataspace-downloader")]
#[command(about = "Search and download Sentinel products from the Copernicus Data Space", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Account user name
    #[arg(long, global = true, env = "DS_USER", hide_env_values = true)]
    pub username: Option<String>,

    /// Account password
    #[arg(long, global = true, env = "DS_PASS", hide_env_values = true)]
    pub password: Option<String>,

    /// Number of concurrent downloads (default: 4, max: 32)
    ///
    /// The object API limits concurrent streams per account; excess requests
    /// are answered with 429 and retried with backoff.
    #[arg(long, global = true, default_value = "4", value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Maximum attempts for failing requests (default: 5, range: 1-20)
    #[arg(long, global = true, default_value = "5", value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_retries: u32,

    /// Directory products are downloaded into
    #[arg(long, global = true, default_value = "products")]
    pub dest: PathBuf,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Serve identity, catalog and download endpoints from one base URL (mirrors, testing)
    #[arg(long, global = true)]
    pub base_url: Option<String>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search the catalog and list matching products
    Search(SearchArgs),

    /// Download products found by a search or named by id
    Download(DownloadArgs),

    /// Show interrupted transfers in the destination directory
    Status(StatusArgs),
}

/// Authenticated clients shared by one command invocation
pub struct Session {
    /// Endpoint configuration
    pub config: Arc<CatalogConfig>,
    /// Authenticated HTTP client
    pub http: Arc<CatalogHttpClient>,
    /// Search client over `http`
    pub search: SearchClient,
}

impl Cli {
    /// Endpoint configuration selected by the flags.
    pub fn catalog_config(&self) -> CatalogConfig {
        let config = match &self.base_url {
            Some(base) => CatalogConfig::for_base_url(base),
            None => CatalogConfig::default(),
        };
        config.with_retry_policy(RetryPolicy::with_max_attempts(self.max_retries))
    }

    /// Build the authenticated session; no network call happens until first use.
    pub fn session(&self, cancellation: SharedCancellation) -> Result<Session, CliError> {
        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            return Err(CliError::ConfigurationError(
                "credentials missing: pass --username/--password or set DS_USER and DS_PASS"
                    .to_string(),
            ));
        };
        let credentials = CredentialStore::new(username.clone(), password.clone())?;

        let config = Arc::new(self.catalog_config());
        let tokens = Arc::new(TokenManager::new(config.clone(), credentials));
        let http = Arc::new(CatalogHttpClient::new(tokens).with_cancellation(cancellation));
        let search = SearchClient::new(config.clone(), http.clone());
        Ok(Session {
            config,
            http,
            search,
        })
    }
}

/// Try to parse an RFC3339 datetime, assuming UTC when no offset is given.
fn try_parse_datetime_rfc3339(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{input}Z")) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

/// Parse a start date from YYYY-MM-DD (start of day, UTC) or RFC3339.
pub fn parse_start_date(input: &str) -> Result<DateTime<Utc>, String> {
    if let Some(dt) = try_parse_datetime_rfc3339(input) {
        return Ok(dt);
    }

    let date = NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| format!("Invalid start date '{input}': {e}"))?;
    let datetime = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| format!("Invalid start date '{input}'"))?;
    Ok(datetime.and_utc())
}

/// Parse an end date from YYYY-MM-DD (end of day, UTC) or RFC3339.
///
/// Date-only input covers the whole day.
pub fn parse_end_date(input: &str) -> Result<DateTime<Utc>, String> {
    if let Some(dt) = try_parse_datetime_rfc3339(input) {
        return Ok(dt);
    }

    let date = NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| format!("Invalid end date '{input}': {e}"))?;
    let datetime = date
        .and_hms_opt(23, 59, 59)
        .ok_or_else(|| format!("Invalid end date '{input}'"))?;
    Ok(datetime.and_utc())
}

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}
