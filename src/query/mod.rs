//! Search parameters for the catalog's OpenSearch endpoint
//!
//! A [`SearchSpec`] is immutable once built. [`SearchSpecBuilder::build`]
//! validates everything the server would otherwise reject late (or worse,
//! silently ignore): date order, cloud-cover bounds, coordinate ranges, the
//! single geographic filter rule and attribute names.
//!
//! [`builder::QueryBuilder`] renders a spec plus a page number into the query
//! string.

pub mod builder;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ClientError, ClientResult};
use crate::Collection;

pub use builder::QueryBuilder;

/// Default number of records per page (the server's own default).
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page the search endpoint serves.
pub const MAX_PAGE_SIZE: u32 = 2000;

/// Parameters every collection accepts as attribute filters.
const COMMON_ATTRIBUTES: &[&str] = &[
    "instrument",
    "orbitDirection",
    "orbitNumber",
    "platform",
    "processingLevel",
    "productType",
    "relativeOrbitNumber",
    "resolution",
    "sensorMode",
    "status",
];

/// Parameters with a dedicated setter; they cannot be passed as attributes.
const RESERVED_PARAMETERS: &[&str] = &[
    "box",
    "cloudCover",
    "completionDate",
    "geometry",
    "lat",
    "lon",
    "maxRecords",
    "page",
    "radius",
    "sortOrder",
    "sortParam",
    "startDate",
];

fn collection_attributes(collection: Collection) -> &'static [&'static str] {
    match collection {
        Collection::Sentinel1 => &["polarisation", "swath", "timeliness"],
        Collection::Sentinel2 => &["tileId"],
        Collection::Sentinel3 => &["timeliness"],
        Collection::Sentinel5P => &["processingMode", "timeliness"],
    }
}

/// Whether `name` is a queryable attribute for `collection` (`None` = any collection).
pub fn is_known_attribute(collection: Option<Collection>, name: &str) -> bool {
    if COMMON_ATTRIBUTES.contains(&name) {
        return true;
    }
    match collection {
        Some(collection) => collection_attributes(collection).contains(&name),
        None => Collection::ALL
            .iter()
            .any(|c| collection_attributes(*c).contains(&name)),
    }
}

/// Geographic restriction of a search
#[derive(Debug, Clone, PartialEq)]
pub enum GeoFilter {
    /// Products intersecting a point, optionally widened by a radius
    Point {
        /// Longitude (EPSG:4326)
        lon: f64,
        /// Latitude (EPSG:4326)
        lat: f64,
        /// Search radius in meters
        radius_m: Option<f64>,
    },
    /// Products intersecting a polygon given as (lon, lat) vertices
    Polygon {
        /// Ring vertices; closed automatically when rendered
        vertices: Vec<(f64, f64)>,
    },
    /// Products intersecting a longitude/latitude rectangle
    BoundingBox {
        /// Western longitude
        west: f64,
        /// Southern latitude
        south: f64,
        /// Eastern longitude
        east: f64,
        /// Northern latitude
        north: f64,
    },
}

impl GeoFilter {
    fn validate(&self) -> ClientResult<()> {
        match self {
            GeoFilter::Point { lon, lat, radius_m } => {
                check_lon(*lon)?;
                check_lat(*lat)?;
                if let Some(radius) = radius_m {
                    if !radius.is_finite() || *radius <= 0.0 {
                        return Err(ClientError::Validation(format!(
                            "radius must be a positive number of meters, got {radius}"
                        )));
                    }
                }
            }
            GeoFilter::Polygon { vertices } => {
                for (lon, lat) in vertices {
                    check_lon(*lon)?;
                    check_lat(*lat)?;
                }
                let mut distinct: Vec<(f64, f64)> = Vec::new();
                for vertex in vertices {
                    if !distinct.contains(vertex) {
                        distinct.push(*vertex);
                    }
                }
                if distinct.len() < 3 {
                    return Err(ClientError::Validation(format!(
                        "polygon needs at least 3 distinct vertices, got {}",
                        distinct.len()
                    )));
                }
            }
            GeoFilter::BoundingBox {
                west,
                south,
                east,
                north,
            } => {
                check_lon(*west)?;
                check_lon(*east)?;
                check_lat(*south)?;
                check_lat(*north)?;
                // west > east is a box crossing the antimeridian
                if south > north {
                    return Err(ClientError::Validation(format!(
                        "bounding box must satisfy south <= north, got {west},{south},{east},{north}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Well-known-text rendering of a polygon ring, closed.
    pub(crate) fn polygon_wkt(vertices: &[(f64, f64)]) -> String {
        let mut ring: Vec<(f64, f64)> = vertices.to_vec();
        if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
            if first != last {
                ring.push(first);
            }
        }
        let points: Vec<String> = ring
            .iter()
            .map(|(lon, lat)| format!("{lon} {lat}"))
            .collect();
        format!("POLYGON(({}))", points.join(","))
    }
}

fn check_lon(lon: f64) -> ClientResult<()> {
    if !(-180.0..=180.0).contains(&lon) {
        return Err(ClientError::Validation(format!(
            "longitude {lon} outside [-180, 180]"
        )));
    }
    Ok(())
}

fn check_lat(lat: f64) -> ClientResult<()> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(ClientError::Validation(format!(
            "latitude {lat} outside [-90, 90]"
        )));
    }
    Ok(())
}

/// Result ordering key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    /// Sensing start
    #[default]
    StartDate,
    /// Sensing end
    CompletionDate,
    /// Catalog publication time
    Published,
}

impl SortField {
    /// Value of the `sortParam` parameter
    pub fn as_param(&self) -> &'static str {
        match self {
            SortField::StartDate => "startDate",
            SortField::CompletionDate => "completionDate",
            SortField::Published => "published",
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "startdate" => Ok(SortField::StartDate),
            "completiondate" => Ok(SortField::CompletionDate),
            "published" => Ok(SortField::Published),
            _ => Err(format!(
                "Invalid sort field: {s}. Valid options: start-date, completion-date, published"
            )),
        }
    }
}

/// Result ordering direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Oldest first
    #[default]
    Ascending,
    /// Newest first
    Descending,
}

impl SortOrder {
    /// Value of the `sortOrder` parameter
    pub fn as_param(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ascending",
            SortOrder::Descending => "descending",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Ascending),
            "desc" | "descending" => Ok(SortOrder::Descending),
            _ => Err(format!("Invalid sort order: {s}. Valid options: asc, desc")),
        }
    }
}

/// Validated, immutable search parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpec {
    collection: Option<Collection>,
    geo_filter: Option<GeoFilter>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    cloud_cover: Option<(u8, u8)>,
    sort_field: SortField,
    sort_order: SortOrder,
    page_size: u32,
    attributes: BTreeMap<String, String>,
}

impl SearchSpec {
    /// Start building a spec.
    pub fn builder() -> SearchSpecBuilder {
        SearchSpecBuilder::default()
    }

    /// Collection to search, or `None` for all collections
    pub fn collection(&self) -> Option<Collection> {
        self.collection
    }

    /// Geographic filter
    pub fn geo_filter(&self) -> Option<&GeoFilter> {
        self.geo_filter.as_ref()
    }

    /// Earliest sensing start
    pub fn start_date(&self) -> Option<DateTime<Utc>> {
        self.start_date
    }

    /// Latest sensing end
    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    /// Inclusive cloud-cover percentage range
    pub fn cloud_cover(&self) -> Option<(u8, u8)> {
        self.cloud_cover
    }

    /// Ordering key
    pub fn sort_field(&self) -> SortField {
        self.sort_field
    }

    /// Ordering direction
    pub fn sort_order(&self) -> SortOrder {
        self.sort_order
    }

    /// Records per page
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Attribute filters, ordered by name
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Check every invariant of the search parameters.
    pub fn validate(&self) -> ClientResult<()> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(ClientError::Validation(format!(
                    "start date {start} is after end date {end}"
                )));
            }
        }

        if let Some((min, max)) = self.cloud_cover {
            if max > 100 || min > max {
                return Err(ClientError::Validation(format!(
                    "cloud cover range must satisfy 0 <= min <= max <= 100, got [{min},{max}]"
                )));
            }
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ClientError::Validation(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }

        if let Some(filter) = &self.geo_filter {
            filter.validate()?;
        }

        for (name, value) in &self.attributes {
            if RESERVED_PARAMETERS.contains(&name.as_str()) {
                return Err(ClientError::Validation(format!(
                    "'{name}' has a dedicated setter and cannot be passed as an attribute"
                )));
            }
            if !is_known_attribute(self.collection, name) {
                let scope = self
                    .collection
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "any collection".to_string());
                return Err(ClientError::Validation(format!(
                    "unknown attribute '{name}' for {scope}"
                )));
            }
            if value.trim().is_empty() {
                return Err(ClientError::Validation(format!(
                    "attribute '{name}' has an empty value"
                )));
            }
            if name == "status" && !matches!(value.as_str(), "ONLINE" | "OFFLINE" | "ALL") {
                return Err(ClientError::Validation(format!(
                    "status must be ONLINE, OFFLINE or ALL, got '{value}'"
                )));
            }
        }

        Ok(())
    }
}

impl fmt::Display for SearchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let collection = self
            .collection
            .map(|c| c.to_string())
            .unwrap_or_else(|| "all collections".to_string());
        write!(f, "{collection}")?;
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            write!(f, " {} to {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))?;
        }
        if let Some((min, max)) = self.cloud_cover {
            write!(f, " cloud {min}-{max}%")?;
        }
        Ok(())
    }
}

/// Builder for [`SearchSpec`]
#[derive(Debug, Clone)]
pub struct SearchSpecBuilder {
    collection: Option<Collection>,
    geo_filters: Vec<GeoFilter>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    cloud_cover: Option<(u8, u8)>,
    sort_field: SortField,
    sort_order: SortOrder,
    page_size: u32,
    attributes: BTreeMap<String, String>,
}

impl Default for SearchSpecBuilder {
    fn default() -> Self {
        Self {
            collection: None,
            geo_filters: Vec::new(),
            start_date: None,
            end_date: None,
            cloud_cover: None,
            sort_field: SortField::default(),
            sort_order: SortOrder::default(),
            page_size: DEFAULT_PAGE_SIZE,
            attributes: BTreeMap::new(),
        }
    }
}

impl SearchSpecBuilder {
    /// Restrict to one collection.
    pub fn collection(mut self, collection: Collection) -> Self {
        self.collection = Some(collection);
        self
    }

    /// Products intersecting a point.
    pub fn point(mut self, lon: f64, lat: f64) -> Self {
        self.geo_filters.push(GeoFilter::Point {
            lon,
            lat,
            radius_m: None,
        });
        self
    }

    /// Products within `radius_m` meters of a point.
    pub fn around(mut self, lon: f64, lat: f64, radius_m: f64) -> Self {
        self.geo_filters.push(GeoFilter::Point {
            lon,
            lat,
            radius_m: Some(radius_m),
        });
        self
    }

    /// Products intersecting a polygon of (lon, lat) vertices.
    pub fn polygon(mut self, vertices: Vec<(f64, f64)>) -> Self {
        self.geo_filters.push(GeoFilter::Polygon { vertices });
        self
    }

    /// Products intersecting a rectangle.
    pub fn bounding_box(mut self, west: f64, south: f64, east: f64, north: f64) -> Self {
        self.geo_filters.push(GeoFilter::BoundingBox {
            west,
            south,
            east,
            north,
        });
        self
    }

    /// Products sensed within `[start, end]`.
    pub fn date_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    /// Products sensed at or after `start`.
    pub fn start_date(mut self, start: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self
    }

    /// Products sensed at or before `end`.
    pub fn end_date(mut self, end: DateTime<Utc>) -> Self {
        self.end_date = Some(end);
        self
    }

    /// Products with cloud cover within `[min, max]` percent.
    pub fn cloud_cover(mut self, min: u8, max: u8) -> Self {
        self.cloud_cover = Some((min, max));
        self
    }

    /// Result ordering.
    pub fn sort(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort_field = field;
        self.sort_order = order;
        self
    }

    /// Records per page.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Collection-specific attribute filter, e.g. `productType=S2MSI2A`.
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Validate and freeze the parameters.
    ///
    /// # Errors
    /// [`ClientError::Validation`] when more than one geographic filter was
    /// set or any other constraint is violated.
    pub fn build(self) -> ClientResult<SearchSpec> {
        if self.geo_filters.len() > 1 {
            return Err(ClientError::Validation(format!(
                "only one geographic filter (point, polygon or box) may be set, got {}",
                self.geo_filters.len()
            )));
        }

        let spec = SearchSpec {
            collection: self.collection,
            geo_filter: self.geo_filters.into_iter().next(),
            start_date: self.start_date,
            end_date: self.end_date,
            cloud_cover: self.cloud_cover,
            sort_field: self.sort_field,
            sort_order: self.sort_order,
            page_size: self.page_size,
            attributes: self.attributes,
        };
        spec.validate()?;
        Ok(spec)
    }
}
