//! # Dataspace Downloader Library
//!
//! A client for the Copernicus Data Space Ecosystem catalog. It discovers
//! Sentinel products by geography, date range, collection and quality
//! attributes, then fetches them with resumable, checksum-verified transfers.
//!
//! ## Features
//!
//! - **Token lifecycle**: OAuth2 password and refresh-token grants with a
//!   single in-flight refresh shared by every caller
//! - **Validated queries**: typed search parameters rendered into a
//!   deterministic OpenSearch query string
//! - **Lazy pagination**: result pages are fetched only as the consumer pulls records
//! - **Resilient transport**: one re-authentication on 401, exponential backoff on 429/5xx
//! - **Resumable downloads**: HTTP range requests continue from the last byte flushed to disk
//! - **Integrity checks**: MD5/SHA-256 verification before a file is reported complete
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dataspace_downloader::auth::{CredentialStore, TokenManager};
//! use dataspace_downloader::catalog::{CatalogConfig, CatalogHttpClient, SearchClient};
//! use dataspace_downloader::downloader::DownloadCoordinator;
//! use dataspace_downloader::query::SearchSpec;
//! use dataspace_downloader::Collection;
//! use futures_util::TryStreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(CatalogConfig::default());
//! let credentials = CredentialStore::from_env("DS_USER", "DS_PASS")?;
//! let tokens = Arc::new(TokenManager::new(config.clone(), credentials));
//! let http = Arc::new(CatalogHttpClient::new(tokens));
//!
//! let spec = SearchSpec::builder()
//!     .collection(Collection::Sentinel2)
//!     .bounding_box(12.0, 41.0, 13.0, 42.0)
//!     .cloud_cover(0, 10)
//!     .build()?;
//!
//! let search = SearchClient::new(config.clone(), http.clone());
//! let products: Vec<_> = search.search(spec).try_collect().await?;
//!
//! let coordinator = DownloadCoordinator::new(config, http);
//! let summary = coordinator.download_all(products, "./products".as_ref(), 4).await?;
//! println!("{} completed, {} failed", summary.completed, summary.failed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`auth`] - Credentials and the access-token lifecycle
//! - [`query`] - Search parameters and query-string rendering
//! - [`catalog`] - Authenticated HTTP, result parsing and paginated search
//! - [`downloader`] - Concurrent, resumable, verified product transfers
//! - [`resume`] - On-disk transfer markers for crash recovery
//! - [`output`] - Product listing writers (CSV, JSON lines)
//! - [`shutdown`] - Process-wide cancellation signal

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Credentials and token lifecycle
pub mod auth;

/// Catalog HTTP access, result parsing and search
pub mod catalog;

/// CLI command implementations
pub mod cli;

/// Download orchestration
pub mod downloader;

/// Error taxonomy shared by every component
pub mod error;

/// Prometheus metrics and structured request accounting
pub mod metrics;

/// Product listing writers
pub mod output;

/// Search parameters and query construction
pub mod query;

/// Transfer markers for resumable downloads
pub mod resume;

/// Process-wide cancellation shared across modules
pub mod shutdown;

pub use error::{ClientError, ClientResult};

/// Satellite collection exposed by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Collection {
    /// Sentinel-1 SAR imagery
    Sentinel1,
    /// Sentinel-2 multispectral imagery
    Sentinel2,
    /// Sentinel-3 ocean and land monitoring
    Sentinel3,
    /// Sentinel-5 Precursor atmospheric monitoring
    Sentinel5P,
}

impl Collection {
    /// All collections, in catalog order.
    pub const ALL: [Collection; 4] = [
        Collection::Sentinel1,
        Collection::Sentinel2,
        Collection::Sentinel3,
        Collection::Sentinel5P,
    ];

    /// Path segment used by the search endpoint (`/collections/{segment}/search.json`).
    pub fn path_segment(&self) -> &'static str {
        match self {
            Collection::Sentinel1 => "Sentinel1",
            Collection::Sentinel2 => "Sentinel2",
            Collection::Sentinel3 => "Sentinel3",
            Collection::Sentinel5P => "Sentinel5P",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

impl FromStr for Collection {
    type Err = String;

    /// Accepts both the path form (`Sentinel2`) and the catalog's
    /// property form (`SENTINEL-2`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "sentinel1" => Ok(Collection::Sentinel1),
            "sentinel2" => Ok(Collection::Sentinel2),
            "sentinel3" => Ok(Collection::Sentinel3),
            "sentinel5p" => Ok(Collection::Sentinel5P),
            _ => Err(format!(
                "Unknown collection: {s}. Valid options: Sentinel1, Sentinel2, Sentinel3, Sentinel5P"
            )),
        }
    }
}

/// Whether a product can be fetched immediately
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProductStatus {
    /// Stored on the online tier and downloadable
    #[default]
    Online,
    /// Archived; must be staged before download
    Offline,
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductStatus::Online => f.write_str("ONLINE"),
            ProductStatus::Offline => f.write_str("OFFLINE"),
        }
    }
}

/// Digest algorithm used to verify a downloaded product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    /// MD5, the digest the catalog publishes for every product
    #[serde(rename = "MD5")]
    Md5,
    /// SHA-256
    #[serde(rename = "SHA256")]
    Sha256,
}

impl ChecksumAlgorithm {
    /// Parse the algorithm label used by the catalog (`MD5`, `SHA256`, `SHA-256`).
    ///
    /// Returns `None` for algorithms this crate cannot verify (e.g. `BLAKE3`).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().replace('-', "").as_str() {
            "MD5" => Some(ChecksumAlgorithm::Md5),
            "SHA256" => Some(ChecksumAlgorithm::Sha256),
            _ => None,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumAlgorithm::Md5 => f.write_str("MD5"),
            ChecksumAlgorithm::Sha256 => f.write_str("SHA256"),
        }
    }
}

/// Declared digest of a product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    /// Digest algorithm
    pub algorithm: ChecksumAlgorithm,
    /// Lowercase hex digest
    pub value: String,
}

impl Checksum {
    /// Create a checksum, normalizing the hex value to lowercase.
    pub fn new(algorithm: ChecksumAlgorithm, value: impl Into<String>) -> Self {
        Self {
            algorithm,
            value: value.into().trim().to_ascii_lowercase(),
        }
    }

    /// Whether `actual` (hex, any case) matches this digest.
    pub fn matches(&self, actual: &str) -> bool {
        self.value.eq_ignore_ascii_case(actual.trim())
    }
}

/// A catalog entry describing one downloadable product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Catalog identifier (UUID)
    pub id: String,
    /// Product name, e.g. `S2A_MSIL2A_20220611T101611_N0400_R065_T32TQM_20220611T164219.SAFE`
    pub title: String,
    /// Collection the product belongs to, when the catalog reports it
    pub collection: Option<Collection>,
    /// Footprint as a raw GeoJSON geometry
    pub footprint: Option<serde_json::Value>,
    /// Sensing start time
    pub acquired_at: DateTime<Utc>,
    /// Archive size in bytes, when known
    pub size_bytes: Option<u64>,
    /// Object API location of the product archive
    pub download_uri: String,
    /// Declared digest, when the catalog publishes a supported one
    pub checksum: Option<Checksum>,
    /// Storage tier
    pub status: ProductStatus,
    /// Collection-specific attributes not mapped onto the fields above
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ProductRecord {
    /// Validate record integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Product id must not be empty".to_string());
        }

        if self.title.trim().is_empty() {
            return Err(format!("Product {} has an empty title", self.id));
        }

        if self.download_uri.trim().is_empty() {
            return Err(format!("Product {} has no download location", self.id));
        }

        if let Some(checksum) = &self.checksum {
            if checksum.value.is_empty() || !checksum.value.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(format!(
                    "Product {} declares a malformed {} checksum: {:?}",
                    self.id, checksum.algorithm, checksum.value
                ));
            }
        }

        Ok(())
    }

    /// File name the archive is stored under.
    ///
    /// Uses the product title with path separators replaced, adding `.zip`
    /// since the object API serves zipped archives.
    pub fn file_name(&self) -> String {
        let sanitized: String = self
            .title
            .trim()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '\0' => '_',
                other => other,
            })
            .collect();
        if sanitized.to_ascii_lowercase().ends_with(".zip") {
            sanitized
        } else {
            format!("{sanitized}.zip")
        }
    }
}
