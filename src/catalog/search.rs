//! Paginated catalog search
//!
//! [`SearchClient::search`] returns a lazy stream: page `n + 1` is requested
//! only after the consumer has drained page `n`, so taking the first few
//! records never costs more than the pages that contain them.

use futures_util::stream::{self, StreamExt};
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::config::CatalogConfig;
use super::http::CatalogHttpClient;
use super::parser::{parse_odata_product, parse_search_page, SearchPage};
use crate::error::{ClientError, ClientResult};
use crate::metrics;
use crate::query::{QueryBuilder, SearchSpec};
use crate::ProductRecord;

/// Stream of products from a search
pub type ProductStream = Pin<Box<dyn Stream<Item = ClientResult<ProductRecord>> + Send>>;

/// Executes searches and product lookups against the catalog
#[derive(Clone)]
pub struct SearchClient {
    config: Arc<CatalogConfig>,
    http: Arc<CatalogHttpClient>,
    builder: QueryBuilder,
}

struct PageCursor {
    client: SearchClient,
    spec: SearchSpec,
    next_page: u32,
    done: bool,
}

impl SearchClient {
    /// Create a search client.
    pub fn new(config: Arc<CatalogConfig>, http: Arc<CatalogHttpClient>) -> Self {
        Self {
            config,
            http,
            builder: QueryBuilder::new(),
        }
    }

    /// Fetch a single result page (1-based).
    ///
    /// # Errors
    /// Propagates [`CatalogHttpClient`] errors; a malformed payload yields
    /// [`ClientError::Parse`] naming the page.
    pub async fn fetch_page(&self, spec: &SearchSpec, page: u32) -> ClientResult<SearchPage> {
        let url = self
            .builder
            .search_url(&self.config.catalog_url, spec, page)?;
        let subject = format!("page {page}");

        debug!(page, url = %url, "Fetching search page");
        let payload = self
            .http
            .get_json("search", &subject, &url, self.config.request_timeout)
            .await?;

        let parsed = parse_search_page(&payload, page, &self.config)?;
        metrics::record_search_page(parsed.records.len());
        debug!(
            page,
            records = parsed.records.len(),
            total_results = ?parsed.total_results,
            "Search page parsed"
        );
        Ok(parsed)
    }

    /// Lazily stream every product matching `spec`.
    ///
    /// Pagination stops after an empty page, a short page, the page that
    /// reaches the server-reported total, or when the next page would start
    /// beyond the configured result ceiling. An error ends the stream after
    /// being yielded.
    pub fn search(&self, spec: SearchSpec) -> ProductStream {
        info!(spec = %spec, page_size = spec.page_size(), "Starting catalog search");

        let cursor = PageCursor {
            client: self.clone(),
            spec,
            next_page: 1,
            done: false,
        };

        let pages = stream::unfold(cursor, |mut cursor| async move {
            if cursor.done {
                return None;
            }
            if cursor.client.http.cancellation().is_cancelled() {
                cursor.done = true;
                return Some((stream::iter(vec![Err(ClientError::Cancelled)]), cursor));
            }

            let page = cursor.next_page;
            let page_size = u64::from(cursor.spec.page_size());
            let offset = u64::from(page - 1) * page_size;
            if offset >= u64::from(cursor.client.config.result_ceiling) {
                info!(
                    page,
                    ceiling = cursor.client.config.result_ceiling,
                    "Result ceiling reached, stopping pagination"
                );
                return None;
            }

            match cursor.client.fetch_page(&cursor.spec, page).await {
                Ok(result) => {
                    let count = result.records.len() as u64;
                    if count == 0 {
                        debug!(page, "Empty page, search complete");
                        return None;
                    }

                    let reached_total = result
                        .total_results
                        .is_some_and(|total| u64::from(page) * page_size >= total);
                    if count < page_size || reached_total {
                        debug!(page, count, "Last page reached");
                        cursor.done = true;
                    }
                    cursor.next_page += 1;

                    let records: Vec<ClientResult<ProductRecord>> =
                        result.records.into_iter().map(Ok).collect();
                    Some((stream::iter(records), cursor))
                }
                Err(err) => {
                    cursor.done = true;
                    Some((stream::iter(vec![Err(err)]), cursor))
                }
            }
        })
        .flatten();

        Box::pin(pages)
    }

    /// Resolve one product by id through the OData products endpoint.
    pub async fn lookup_product(&self, product_id: &str) -> ClientResult<ProductRecord> {
        let id = product_id.trim();
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ClientError::Validation(format!(
                "invalid product id '{product_id}'"
            )));
        }

        let url = Url::parse(&self.config.product_url(id)).map_err(|e| {
            ClientError::Validation(format!("invalid product URL for '{id}': {e}"))
        })?;

        let payload = self
            .http
            .get_json("lookup", id, &url, self.config.request_timeout)
            .await?;
        let record = parse_odata_product(&payload, &self.config)?;
        debug!(product_id = %record.id, title = %record.title, status = %record.status, "Product resolved");
        Ok(record)
    }
}
