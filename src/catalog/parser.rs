//! Catalog payload parsing
//!
//! Search pages arrive as GeoJSON feature collections whose property sets
//! differ per collection. Fields every product has are mapped onto
//! [`ProductRecord`]; everything else is kept verbatim in
//! [`ProductRecord::extra`] so no attribute is lost.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::config::CatalogConfig;
use crate::error::{ClientError, ClientResult};
use crate::{Checksum, ChecksumAlgorithm, Collection, ProductRecord, ProductStatus};

/// Feature properties mapped onto dedicated [`ProductRecord`] fields.
const MAPPED_PROPERTIES: &[&str] = &["title", "startDate", "collection", "status", "checksum"];

/// OData product fields mapped onto dedicated [`ProductRecord`] fields.
const MAPPED_ODATA_FIELDS: &[&str] = &[
    "Id",
    "Name",
    "ContentLength",
    "Online",
    "ContentDate",
    "Checksum",
    "GeoFootprint",
];

/// One parsed page of search results
#[derive(Debug, Clone)]
pub struct SearchPage {
    /// Page number (1-based)
    pub page: u32,
    /// Products on the page, in server order
    pub records: Vec<ProductRecord>,
    /// Total matches reported by the server, when it reports one
    pub total_results: Option<u64>,
}

/// Parse one search result page.
///
/// # Errors
/// [`ClientError::Parse`] naming `page` when the payload is not a feature
/// collection or a feature lacks `id`, `properties.title` or
/// `properties.startDate`.
pub fn parse_search_page(
    payload: &Value,
    page: u32,
    config: &CatalogConfig,
) -> ClientResult<SearchPage> {
    let root = payload
        .as_object()
        .ok_or_else(|| ClientError::page_parse(page, "response is not a JSON object"))?;

    let features = root
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| ClientError::page_parse(page, "missing 'features' array"))?;

    let total_results = root
        .get("properties")
        .and_then(|p| p.get("totalResults"))
        .and_then(Value::as_u64);

    let records = features
        .iter()
        .enumerate()
        .map(|(index, feature)| {
            parse_feature(feature, config).map_err(|message| {
                ClientError::page_parse(page, format!("feature {index}: {message}"))
            })
        })
        .collect::<ClientResult<Vec<_>>>()?;

    Ok(SearchPage {
        page,
        records,
        total_results,
    })
}

fn parse_feature(feature: &Value, config: &CatalogConfig) -> Result<ProductRecord, String> {
    let object = feature.as_object().ok_or("feature is not an object")?;
    let id = required_str(object, "id")?.to_string();
    let properties = object
        .get("properties")
        .and_then(Value::as_object)
        .ok_or("missing 'properties' object")?;

    let title = required_str(properties, "title")?.to_string();
    let acquired_at = parse_timestamp(required_str(properties, "startDate")?)
        .map_err(|e| format!("invalid 'startDate': {e}"))?;

    let collection = properties
        .get("collection")
        .and_then(Value::as_str)
        .and_then(|name| name.parse::<Collection>().ok());

    let status = match properties.get("status").and_then(Value::as_str) {
        Some(status) => parse_status(status)?,
        None => ProductStatus::Online,
    };

    let download = properties.get("services").and_then(|s| s.get("download"));
    let download_uri = download
        .and_then(|d| d.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| config.download_uri(&id));
    let size_bytes = download.and_then(|d| d.get("size")).and_then(Value::as_u64);

    let checksum = match properties.get("checksum") {
        Some(Value::Array(entries)) => pick_checksum(entries),
        Some(Value::Object(entry)) => checksum_from_entry(entry),
        _ => None,
    };

    let mut extra: BTreeMap<String, Value> = properties
        .iter()
        .filter(|(key, _)| !MAPPED_PROPERTIES.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    for (key, value) in object {
        if !matches!(key.as_str(), "type" | "id" | "geometry" | "properties") {
            extra.insert(key.clone(), value.clone());
        }
    }

    Ok(ProductRecord {
        id,
        title,
        collection,
        footprint: object.get("geometry").filter(|g| !g.is_null()).cloned(),
        acquired_at,
        size_bytes,
        download_uri,
        checksum,
        status,
        extra,
    })
}

/// Parse one OData product entity (`Products({id})`).
///
/// Also accepts a `{"value": [...]}` envelope and uses its first entry.
pub fn parse_odata_product(payload: &Value, config: &CatalogConfig) -> ClientResult<ProductRecord> {
    let parse_error = |message: String| ClientError::Parse {
        context: "product lookup".to_string(),
        message,
    };

    let entity = match payload.get("value") {
        Some(Value::Array(values)) => values
            .first()
            .ok_or_else(|| parse_error("empty 'value' array".to_string()))?,
        _ => payload,
    };
    let object = entity
        .as_object()
        .ok_or_else(|| parse_error("product is not a JSON object".to_string()))?;

    let id = required_str(object, "Id").map_err(parse_error)?.to_string();
    let title = required_str(object, "Name").map_err(parse_error)?.to_string();
    let acquired_at = object
        .get("ContentDate")
        .and_then(|d| d.get("Start"))
        .and_then(Value::as_str)
        .ok_or_else(|| parse_error("missing 'ContentDate.Start'".to_string()))
        .and_then(|s| parse_timestamp(s).map_err(|e| parse_error(format!("invalid 'ContentDate.Start': {e}"))))?;

    let status = match object.get("Online").and_then(Value::as_bool) {
        Some(false) => ProductStatus::Offline,
        _ => ProductStatus::Online,
    };

    let checksum = object
        .get("Checksum")
        .and_then(Value::as_array)
        .and_then(|entries| pick_checksum(entries));

    let extra = object
        .iter()
        .filter(|(key, _)| {
            !MAPPED_ODATA_FIELDS.contains(&key.as_str()) && !key.starts_with("@odata")
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(ProductRecord {
        download_uri: config.download_uri(&id),
        collection: collection_from_name(&title),
        footprint: object.get("GeoFootprint").filter(|g| !g.is_null()).cloned(),
        size_bytes: object.get("ContentLength").and_then(Value::as_u64),
        id,
        title,
        acquired_at,
        checksum,
        status,
        extra,
    })
}

/// Infer the collection from a product name (`S2A_MSIL2A_...` → Sentinel-2).
pub fn collection_from_name(name: &str) -> Option<Collection> {
    if name.starts_with("S5P") {
        Some(Collection::Sentinel5P)
    } else if name.starts_with("S1") {
        Some(Collection::Sentinel1)
    } else if name.starts_with("S2") {
        Some(Collection::Sentinel2)
    } else if name.starts_with("S3") {
        Some(Collection::Sentinel3)
    } else {
        None
    }
}

/// Prefer SHA-256 over MD5; skip algorithms that cannot be verified.
fn pick_checksum(entries: &[Value]) -> Option<Checksum> {
    let mut candidates: Vec<Checksum> = entries
        .iter()
        .filter_map(Value::as_object)
        .filter_map(checksum_from_entry)
        .collect();
    candidates.sort_by_key(|c| match c.algorithm {
        ChecksumAlgorithm::Sha256 => 0,
        ChecksumAlgorithm::Md5 => 1,
    });
    candidates.into_iter().next()
}

fn checksum_from_entry(entry: &Map<String, Value>) -> Option<Checksum> {
    let field = |lower: &str, upper: &str| {
        entry
            .get(lower)
            .or_else(|| entry.get(upper))
            .and_then(Value::as_str)
    };
    let algorithm = ChecksumAlgorithm::from_label(field("algorithm", "Algorithm")?)?;
    let value = field("value", "Value")?;
    if value.trim().is_empty() {
        return None;
    }
    Some(Checksum::new(algorithm, value))
}

fn parse_status(status: &str) -> Result<ProductStatus, String> {
    match status.to_ascii_uppercase().as_str() {
        "ONLINE" => Ok(ProductStatus::Online),
        "OFFLINE" | "ORDERABLE" | "ARCHIVED" => Ok(ProductStatus::Offline),
        other => Err(format!("unknown product status '{other}'")),
    }
}

fn required_str<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| format!("missing or empty '{key}'"))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| e.to_string())
}
