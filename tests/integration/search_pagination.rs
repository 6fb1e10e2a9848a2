//! Integration tests for lazy, paginated search

use futures_util::{StreamExt, TryStreamExt};

use dataspace_downloader::catalog::CatalogConfig;
use dataspace_downloader::query::SearchSpec;
use dataspace_downloader::{ClientError, Collection};

use crate::support::{feature_collection, features, MockCatalog};

fn spec(page_size: u32) -> SearchSpec {
    SearchSpec::builder()
        .collection(Collection::Sentinel2)
        .bounding_box(12.0, 41.0, 13.0, 42.0)
        .page_size(page_size)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_short_page_ends_pagination() {
    let mock = MockCatalog::start().await;
    mock.set_pages(vec![
        feature_collection(features(0, 2), None),
        feature_collection(features(2, 1), None),
    ]);
    let session = mock.session();

    let records: Vec<_> = session.search().search(spec(2)).try_collect().await.unwrap();

    let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["p0", "p1", "p2"]);
    assert_eq!(mock.search_count(), 2);
}

#[tokio::test]
async fn test_empty_page_ends_pagination() {
    let mock = MockCatalog::start().await;
    mock.set_pages(vec![
        feature_collection(features(0, 2), None),
        feature_collection(Vec::new(), None),
    ]);
    let session = mock.session();

    let records: Vec<_> = session.search().search(spec(2)).try_collect().await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(mock.search_count(), 2);
}

#[tokio::test]
async fn test_total_results_ends_pagination_without_extra_request() {
    let mock = MockCatalog::start().await;
    mock.set_pages(vec![
        feature_collection(features(0, 2), Some(4)),
        feature_collection(features(2, 2), Some(4)),
        feature_collection(features(4, 2), Some(4)),
    ]);
    let session = mock.session();

    let records: Vec<_> = session.search().search(spec(2)).try_collect().await.unwrap();

    assert_eq!(records.len(), 4);
    assert_eq!(mock.search_count(), 2);
}

#[tokio::test]
async fn test_pages_are_fetched_lazily() {
    let mock = MockCatalog::start().await;
    mock.set_pages(vec![
        feature_collection(features(0, 2), None),
        feature_collection(features(2, 2), None),
        feature_collection(features(4, 2), None),
    ]);
    let session = mock.session();

    let first_three: Vec<_> = session
        .search()
        .search(spec(2))
        .take(3)
        .collect()
        .await;

    assert_eq!(first_three.len(), 3);
    assert_eq!(mock.search_count(), 2);
}

#[tokio::test]
async fn test_page_requests_carry_page_numbers_in_order() {
    let mock = MockCatalog::start().await;
    mock.set_pages(vec![
        feature_collection(features(0, 2), None),
        feature_collection(features(2, 1), None),
    ]);
    let session = mock.session();

    let _: Vec<_> = session.search().search(spec(2)).try_collect().await.unwrap();

    let queries = mock.state.search_queries.lock().unwrap().clone();
    assert!(queries[0].ends_with("maxRecords=2&page=1"), "{}", queries[0]);
    assert!(queries[1].ends_with("maxRecords=2&page=2"), "{}", queries[1]);
    assert!(queries[0].contains("box=12%2C41%2C13%2C42"));
}

#[tokio::test]
async fn test_result_ceiling_stops_pagination() {
    let mock = MockCatalog::start().await;
    mock.set_pages(vec![
        feature_collection(features(0, 2), None),
        feature_collection(features(2, 2), None),
        feature_collection(features(4, 2), None),
    ]);
    let session = mock.session_with(mock.config().with_result_ceiling(4));

    let records: Vec<_> = session.search().search(spec(2)).try_collect().await.unwrap();

    assert_eq!(records.len(), 4);
    assert_eq!(mock.search_count(), 2);
}

#[tokio::test]
async fn test_malformed_page_yields_parse_error_and_ends_stream() {
    let mock = MockCatalog::start().await;
    mock.set_pages(vec![
        feature_collection(features(0, 2), None),
        serde_json::json!({"type": "FeatureCollection", "features": "nope"}),
    ]);
    let session = mock.session();

    let items: Vec<_> = session.search().search(spec(2)).collect().await;

    assert_eq!(items.len(), 3);
    assert!(items[0].is_ok());
    assert!(items[1].is_ok());
    match &items[2] {
        Err(ClientError::Parse { context, .. }) => assert_eq!(context, "page 2"),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_records_keep_collection_specific_attributes() {
    let mock = MockCatalog::start().await;
    mock.set_pages(vec![feature_collection(features(0, 1), None)]);
    let session = mock.session();

    let records: Vec<_> = session.search().search(spec(5)).try_collect().await.unwrap();

    let record = &records[0];
    assert_eq!(record.collection, Some(Collection::Sentinel2));
    assert_eq!(record.size_bytes, Some(1024));
    assert_eq!(record.extra["productType"], "S2MSI2A");
    assert!(record.footprint.is_some());
}

#[tokio::test]
async fn test_cancelled_search_yields_cancelled() {
    let mock = MockCatalog::start().await;
    mock.set_pages(vec![feature_collection(features(0, 2), None)]);
    let session = mock.session();
    session.cancellation.cancel();

    let items: Vec<_> = session.search().search(spec(2)).collect().await;

    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(ClientError::Cancelled)));
    assert_eq!(mock.search_count(), 0);
}

#[test]
fn test_default_ceiling() {
    assert_eq!(CatalogConfig::default().result_ceiling, 10_000);
}
