//! Integration tests for downloads requested by product id

use tempfile::TempDir;

use dataspace_downloader::downloader::TaskState;
use dataspace_downloader::{ClientError, ProductStatus};

use crate::support::{archive_bytes, md5_hex, MockCatalog, MockProduct};

#[tokio::test]
async fn test_lookup_maps_odata_entity() {
    let mock = MockCatalog::start().await;
    let body = archive_bytes(2048, 3);
    mock.add_product(MockProduct::new("abc-123", body.clone()));
    let session = mock.session();

    let record = session.search().lookup_product("abc-123").await.unwrap();

    assert_eq!(record.id, "abc-123");
    assert_eq!(record.size_bytes, Some(2048));
    assert_eq!(record.status, ProductStatus::Online);
    assert_eq!(record.checksum.unwrap().value, md5_hex(&body));
    assert_eq!(
        record.download_uri,
        format!("{}/download/v1/Products(abc-123)/$value", mock.base_url)
    );
}

#[tokio::test]
async fn test_lookup_rejects_malformed_id_without_request() {
    let mock = MockCatalog::start().await;
    let session = mock.session();

    let err = session.search().lookup_product("a/../b").await.unwrap_err();

    assert!(matches!(err, ClientError::Validation(_)));
    assert_eq!(mock.state.token_requests.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_download_ids_resolves_and_downloads() {
    let mock = MockCatalog::start().await;
    let body = archive_bytes(10_000, 9);
    let product = MockProduct::new("id-1", body.clone());
    let file_name = format!("{}.zip", product.title);
    mock.add_product(product);
    mock.add_product(MockProduct::new("id-2", archive_bytes(500, 1)).offline());
    let session = mock.session();
    let dir = TempDir::new().unwrap();

    let ids = vec!["id-1".to_string(), "id-2".to_string(), "unknown".to_string()];
    let summary = session
        .coordinator()
        .download_ids(&session.search(), &ids, dir.path(), 2)
        .await
        .unwrap();

    assert_eq!(summary.tasks.len(), 3);
    assert_eq!(summary.tasks["id-1"].state, TaskState::Completed);
    assert_eq!(summary.tasks["id-2"].error_kind.as_deref(), Some("not_available"));
    assert_eq!(summary.tasks["unknown"].state, TaskState::Failed);
    assert_eq!(summary.tasks["unknown"].error_kind.as_deref(), Some("http"));
    assert_eq!(std::fs::read(dir.path().join(file_name)).unwrap(), body);
    assert!(mock.requests_for("id-2").is_empty());
}
