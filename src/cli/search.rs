//! Search command

use clap::Parser;
use futures_util::StreamExt;
use std::path::PathBuf;
use tracing::info;

use super::{parse_end_date, parse_start_date, CliError, Session};
use crate::catalog::SearchClient;
use crate::downloader::progress::format_bytes;
use crate::output::create_product_writer;
use crate::query::{SearchSpec, SortField, SortOrder};
use crate::{Collection, ProductRecord};

/// Polygon vertices given on the command line
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonArg(pub Vec<(f64, f64)>);

/// Search filters shared by `search` and `download`
#[derive(Parser, Debug, Clone, Default)]
pub struct SearchArgs {
    /// Collection (Sentinel1, Sentinel2, Sentinel3, Sentinel5P)
    #[arg(long)]
    pub collection: Option<Collection>,

    /// Bounding box as west,south,east,north
    #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
    pub bbox: Option<(f64, f64, f64, f64)>,

    /// Point as lon,lat
    #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
    pub point: Option<(f64, f64)>,

    /// Radius around --point in meters
    #[arg(long, requires = "point")]
    pub radius: Option<f64>,

    /// Polygon as "lon lat,lon lat,..."
    #[arg(long, value_parser = parse_polygon, allow_hyphen_values = true)]
    pub polygon: Option<PolygonArg>,

    /// Sensing start (YYYY-MM-DD or RFC3339)
    #[arg(long, value_parser = parse_start_date)]
    pub start: Option<chrono::DateTime<chrono::Utc>>,

    /// Sensing end (YYYY-MM-DD or RFC3339; dates include the whole day)
    #[arg(long, value_parser = parse_end_date)]
    pub end: Option<chrono::DateTime<chrono::Utc>>,

    /// Cloud cover range in percent as min,max
    #[arg(long, value_parser = parse_cloud_cover)]
    pub cloud_cover: Option<(u8, u8)>,

    /// Sort key: start-date, completion-date or published
    #[arg(long, default_value = "start-date")]
    pub sort: SortField,

    /// Sort order: asc or desc
    #[arg(long, default_value = "asc")]
    pub order: SortOrder,

    /// Records per result page (1-2000)
    #[arg(long, default_value = "20")]
    pub page_size: u32,

    /// Attribute filter as name=value (repeatable), e.g. productType=S2MSI2A
    #[arg(long = "attr", value_parser = parse_attribute)]
    pub attributes: Vec<(String, String)>,

    /// Stop after this many products
    #[arg(long)]
    pub limit: Option<usize>,

    /// Write the listing to a .csv or .jsonl file
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl SearchArgs {
    /// Whether any search filter was given.
    pub fn has_filters(&self) -> bool {
        self.collection.is_some()
            || self.bbox.is_some()
            || self.point.is_some()
            || self.polygon.is_some()
            || self.start.is_some()
            || self.end.is_some()
            || self.cloud_cover.is_some()
            || !self.attributes.is_empty()
    }

    /// Validated search parameters.
    pub fn to_spec(&self) -> Result<SearchSpec, CliError> {
        let mut builder = SearchSpec::builder()
            .sort(self.sort, self.order)
            .page_size(self.page_size);

        if let Some(collection) = self.collection {
            builder = builder.collection(collection);
        }
        if let Some((west, south, east, north)) = self.bbox {
            builder = builder.bounding_box(west, south, east, north);
        }
        if let Some((lon, lat)) = self.point {
            builder = match self.radius {
                Some(radius) => builder.around(lon, lat, radius),
                None => builder.point(lon, lat),
            };
        }
        if let Some(PolygonArg(vertices)) = &self.polygon {
            builder = builder.polygon(vertices.clone());
        }
        if let Some(start) = self.start {
            builder = builder.start_date(start);
        }
        if let Some(end) = self.end {
            builder = builder.end_date(end);
        }
        if let Some((min, max)) = self.cloud_cover {
            builder = builder.cloud_cover(min, max);
        }
        for (name, value) in &self.attributes {
            builder = builder.attribute(name.clone(), value.clone());
        }

        Ok(builder.build()?)
    }

    /// Run the search, honouring `--limit`, and write the listing if requested.
    pub async fn collect(&self, search: &SearchClient) -> Result<Vec<ProductRecord>, CliError> {
        let spec = self.to_spec()?;
        let mut stream = search.search(spec);
        let mut writer = match &self.output {
            Some(path) => Some(create_product_writer(path)?),
            None => None,
        };

        let mut products = Vec::new();
        while let Some(record) = stream.next().await {
            let record = record?;
            if let Some(writer) = writer.as_mut() {
                writer.write_product(&record)?;
            }
            products.push(record);
            if self.limit.is_some_and(|limit| products.len() >= limit) {
                break;
            }
        }

        if let Some(writer) = writer {
            writer.finish()?;
        }
        info!(products = products.len(), "Search complete");
        Ok(products)
    }

    /// Execute the search command.
    pub async fn execute(&self, session: &Session) -> Result<(), CliError> {
        let products = self.collect(&session.search).await?;

        if self.output.is_none() {
            for product in &products {
                println!("{}", format_listing_line(product));
            }
        }
        println!("{} product(s) found", products.len());
        Ok(())
    }
}

fn format_listing_line(product: &ProductRecord) -> String {
    let size = product
        .size_bytes
        .map(format_bytes)
        .unwrap_or_else(|| "?".to_string());
    format!(
        "{}  {}  {}  {:>10}  {}",
        product.id,
        product.acquired_at.format("%Y-%m-%dT%H:%M:%SZ"),
        product.status,
        size,
        product.title
    )
}

fn parse_floats(input: &str, expected: usize, what: &str) -> Result<Vec<f64>, String> {
    let values = input
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| format!("Invalid {what} '{input}': '{part}' is not a number"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if values.len() != expected {
        return Err(format!(
            "Invalid {what} '{input}': expected {expected} comma-separated numbers"
        ));
    }
    Ok(values)
}

fn parse_bbox(input: &str) -> Result<(f64, f64, f64, f64), String> {
    let v = parse_floats(input, 4, "bounding box")?;
    Ok((v[0], v[1], v[2], v[3]))
}

fn parse_point(input: &str) -> Result<(f64, f64), String> {
    let v = parse_floats(input, 2, "point")?;
    Ok((v[0], v[1]))
}

fn parse_polygon(input: &str) -> Result<PolygonArg, String> {
    input
        .split(',')
        .map(|vertex| {
            let mut parts = vertex.split_whitespace().map(str::parse::<f64>);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(Ok(lon)), Some(Ok(lat)), None) => Ok((lon, lat)),
                _ => Err(format!("Invalid polygon vertex '{}': expected 'lon lat'", vertex.trim())),
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .map(PolygonArg)
}

fn parse_cloud_cover(input: &str) -> Result<(u8, u8), String> {
    let (min, max) = input
        .split_once(',')
        .ok_or_else(|| format!("Invalid cloud cover '{input}': expected min,max"))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<u8>()
            .map_err(|_| format!("Invalid cloud cover '{input}': '{s}' is not a percentage"))
    };
    Ok((parse(min)?, parse(max)?))
}

fn parse_attribute(input: &str) -> Result<(String, String), String> {
    let (name, value) = input
        .split_once('=')
        .ok_or_else(|| format!("Invalid attribute '{input}': expected name=value"))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}
