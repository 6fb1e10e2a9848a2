//! Integration tests for cancellation during downloads

use std::time::Duration;
use tempfile::TempDir;

use dataspace_downloader::downloader::TaskState;
use dataspace_downloader::resume::{TransferMarker, TransferPaths};

use crate::support::{archive_bytes, MockCatalog, MockProduct};

#[tokio::test]
async fn test_cancel_mid_transfer_leaves_resumable_state() {
    let mock = MockCatalog::start().await;
    let body = archive_bytes(200_000, 21);
    let slow = mock.add_product(
        MockProduct::new("slow", body.clone()).with_chunks(4096, Duration::from_millis(20)),
    );
    let queued = mock.add_product(MockProduct::new("queued", archive_bytes(1000, 1)));
    let session = mock.session();
    let dir = TempDir::new().unwrap();

    let cancellation = session.cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancellation.cancel();
    });

    let summary = session
        .coordinator()
        .with_checkpoint_interval(8192)
        .download_all(vec![slow.clone(), queued], dir.path(), 1)
        .await
        .unwrap();

    let task = &summary.tasks["slow"];
    assert_eq!(task.state, TaskState::Resuming);
    assert!(task.byte_range_completed > 0);
    assert!(task.byte_range_completed < body.len() as u64);

    let paths = TransferPaths::for_destination(dir.path().join(slow.file_name()));
    assert!(!paths.destination.exists());
    let on_disk = std::fs::metadata(&paths.partial).unwrap().len();
    assert_eq!(task.byte_range_completed, on_disk);

    let marker = TransferMarker::load(&paths.marker).unwrap();
    assert_eq!(marker.state, TaskState::Resuming);
    assert_eq!(marker.byte_range_completed, on_disk);

    assert_eq!(summary.tasks["queued"].state, TaskState::Pending);
    assert!(mock.requests_for("queued").is_empty());
    assert_eq!(summary.resuming, 1);
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.completed, 0);
}

#[tokio::test]
async fn test_cancelled_transfer_resumes_on_next_run() {
    let mock = MockCatalog::start().await;
    let body = archive_bytes(120_000, 17);
    let record = mock.add_product(
        MockProduct::new("again", body.clone()).with_chunks(4096, Duration::from_millis(10)),
    );
    let dir = TempDir::new().unwrap();

    let first_session = mock.session();
    let cancellation = first_session.cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancellation.cancel();
    });
    let first = first_session
        .coordinator()
        .download_all(vec![record.clone()], dir.path(), 1)
        .await
        .unwrap();
    let interrupted_at = first.tasks["again"].byte_range_completed;
    assert_eq!(first.tasks["again"].state, TaskState::Resuming);

    let second = mock
        .session()
        .coordinator()
        .download_all(vec![record.clone()], dir.path(), 1)
        .await
        .unwrap();

    assert_eq!(second.tasks["again"].state, TaskState::Completed);
    let requests = mock.requests_for("again");
    assert_eq!(requests.len(), 2);
    if interrupted_at > 0 {
        assert_eq!(
            requests[1].range.as_deref(),
            Some(format!("bytes={interrupted_at}-").as_str())
        );
    }
    assert_eq!(
        std::fs::read(dir.path().join(record.file_name())).unwrap(),
        body
    );
}

#[tokio::test]
async fn test_cancel_before_start_schedules_nothing() {
    let mock = MockCatalog::start().await;
    let records = vec![
        mock.add_product(MockProduct::new("x", archive_bytes(500, 1))),
        mock.add_product(MockProduct::new("y", archive_bytes(500, 2))),
    ];
    let session = mock.session();
    session.cancellation.cancel();
    let dir = TempDir::new().unwrap();

    let summary = session
        .coordinator()
        .download_all(records, dir.path(), 2)
        .await
        .unwrap();

    assert_eq!(summary.pending, 2);
    assert!(summary
        .tasks
        .values()
        .all(|task| task.state != TaskState::Completed));
    assert!(mock.download_requests().is_empty());
}
