//! Catalog access: authenticated HTTP, payload parsing and search
//!
//! - [`config`] - Endpoints and timeouts ([`CatalogConfig`])
//! - [`http`] - Bearer auth, re-authentication and backoff ([`CatalogHttpClient`])
//! - [`parser`] - Feature collections and OData entities into [`crate::ProductRecord`]
//! - [`search`] - Lazy paginated search and lookups by id ([`SearchClient`])
//! - [`retry`] - Retry log formatting
//! - [`shared`] - Process-wide HTTP client

pub mod config;
pub mod http;
pub mod parser;
pub mod retry;
pub mod search;
pub mod shared;

pub use config::CatalogConfig;
pub use http::CatalogHttpClient;
pub use parser::SearchPage;
pub use search::{ProductStream, SearchClient};
