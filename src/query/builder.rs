//! Query-string rendering for the OpenSearch endpoint
//!
//! Rendering is a pure function of `(spec, page)`: parameters are emitted in
//! a fixed order and attribute filters in name order, so the same inputs give
//! byte-identical output (which keeps request logs and caches comparable).

use chrono::{DateTime, SecondsFormat, Utc};
use url::form_urlencoded::Serializer;
use url::Url;

use super::{GeoFilter, SearchSpec};
use crate::error::{ClientError, ClientResult};
use crate::Collection;

/// Renders [`SearchSpec`]s into catalog queries
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryBuilder;

impl QueryBuilder {
    /// Create a builder.
    pub fn new() -> Self {
        Self
    }

    /// Render the URL-encoded query string for `page` (1-based).
    ///
    /// # Errors
    /// [`ClientError::Validation`] for page 0 or a spec that violates its
    /// invariants (unknown attribute names included).
    pub fn build(&self, spec: &SearchSpec, page: u32) -> ClientResult<String> {
        if page == 0 {
            return Err(ClientError::Validation("pages are numbered from 1".to_string()));
        }
        spec.validate()?;

        let mut query = Serializer::new(String::new());

        if let Some((min, max)) = spec.cloud_cover() {
            query.append_pair("cloudCover", &format!("[{min},{max}]"));
        }
        if let Some(start) = spec.start_date() {
            query.append_pair("startDate", &format_timestamp(start));
        }
        if let Some(end) = spec.end_date() {
            query.append_pair("completionDate", &format_timestamp(end));
        }

        match spec.geo_filter() {
            Some(GeoFilter::Point { lon, lat, radius_m }) => {
                query.append_pair("lon", &lon.to_string());
                query.append_pair("lat", &lat.to_string());
                if let Some(radius) = radius_m {
                    query.append_pair("radius", &radius.to_string());
                }
            }
            Some(GeoFilter::Polygon { vertices }) => {
                query.append_pair("geometry", &GeoFilter::polygon_wkt(vertices));
            }
            Some(GeoFilter::BoundingBox {
                west,
                south,
                east,
                north,
            }) => {
                query.append_pair("box", &format!("{west},{south},{east},{north}"));
            }
            None => {}
        }

        query.append_pair("sortParam", spec.sort_field().as_param());
        query.append_pair("sortOrder", spec.sort_order().as_param());
        query.append_pair("maxRecords", &spec.page_size().to_string());
        query.append_pair("page", &page.to_string());

        for (name, value) in spec.attributes() {
            query.append_pair(name, value);
        }

        Ok(query.finish())
    }

    /// Search path relative to the collections root.
    pub fn endpoint_path(&self, collection: Option<Collection>) -> String {
        match collection {
            Some(collection) => format!("{}/search.json", collection.path_segment()),
            None => "search.json".to_string(),
        }
    }

    /// Full search URL for `page` under `catalog_url`.
    pub fn search_url(&self, catalog_url: &str, spec: &SearchSpec, page: u32) -> ClientResult<Url> {
        let query = self.build(spec, page)?;
        let raw = format!(
            "{}/{}?{}",
            catalog_url.trim_end_matches('/'),
            self.endpoint_path(spec.collection()),
            query
        );
        Url::parse(&raw).map_err(|e| {
            ClientError::Validation(format!("invalid catalog URL {catalog_url}: {e}"))
        })
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
