use super::*;
use crate::config::GIB;
use crate::error::DownloadError;
use crate::types::{ItemId, Status};

#[tokio::test]
async fn test_enqueue_creates_pending_download() {
    let (downloader, _temp_dir) = create_test_downloader().await;
    let mut events = downloader.subscribe();

    let item = seed_item(&downloader, "g1", "https://cdn.example.com/g1.mp3", None).await;
    let download = downloader.enqueue(item).await.unwrap();

    assert_eq!(download.status, Status::Pending);
    assert_eq!(download.item_id, item);
    assert_eq!(download.progress, 0.0);
    assert_eq!(download.file_path, "Test-Show/2024-01-02-episode-g1.mp3");
    assert!(downloader.files().root().join("Test-Show").is_dir());

    match events.try_recv().unwrap() {
        Event::Queued { id, item_id, path } => {
            assert_eq!(id, download.id);
            assert_eq!(item_id, item);
            assert_eq!(path, std::path::PathBuf::from("Test-Show/2024-01-02-episode-g1.mp3"));
        }
        other => panic!("expected Queued event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_enqueue_is_idempotent_per_item() {
    let (downloader, _temp_dir) = create_test_downloader().await;
    let item = seed_item(&downloader, "g1", "https://cdn.example.com/g1.mp3", None).await;

    let first = downloader.enqueue(item).await.unwrap();
    let second = downloader.enqueue(item).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(
        downloader
            .db
            .count_downloads_by_status(Status::Pending)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_same_day_items_with_equal_slugs_get_distinct_paths() {
    let (downloader, _temp_dir) = create_test_downloader().await;
    let a = seed_titled_item(&downloader, "a1", "Episode a!", "https://cdn.example.com/1.mp3", None).await;
    let b = seed_titled_item(&downloader, "a2", "Episode a?", "https://cdn.example.com/2.mp3", None).await;

    let first = downloader.enqueue(a).await.unwrap();
    let second = downloader.enqueue(b).await.unwrap();

    assert_eq!(first.file_path, "Test-Show/2024-01-02-episode-a.mp3");
    assert_eq!(second.file_path, format!("Test-Show/2024-01-02-episode-a-{}.mp3", b));

    // Requeue keeps the path chosen at admission
    assert!(downloader.db.cancel_download(second.id).await.unwrap());
    let again = downloader.enqueue(b).await.unwrap();
    assert_eq!(again.file_path, second.file_path);
}

#[tokio::test]
async fn test_enqueue_avoids_unowned_file_at_planned_path() {
    let (downloader, _temp_dir) = create_test_downloader().await;
    let item = seed_item(&downloader, "g1", "https://cdn.example.com/g1.mp3", None).await;

    let folder = downloader.files().root().join("Test-Show");
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("2024-01-02-episode-g1.mp3"), b"someone else's").unwrap();

    let download = downloader.enqueue(item).await.unwrap();
    assert_eq!(download.file_path, format!("Test-Show/2024-01-02-episode-g1-{}.mp3", item));
    assert_eq!(
        std::fs::read(folder.join("2024-01-02-episode-g1.mp3")).unwrap(),
        b"someone else's"
    );
}

#[tokio::test]
async fn test_long_non_latin_title_yields_creatable_path() {
    let (downloader, _temp_dir) = create_test_downloader().await;
    let title = "ポッドキャスト".repeat(25);
    let item = seed_titled_item(&downloader, "jp", &title, "https://cdn.example.com/jp.mp3", None).await;

    let download = downloader.enqueue(item).await.unwrap();
    let full = downloader.files().resolve(&download.file_path).unwrap();

    assert!(full.file_name().unwrap().len() <= 255);
    std::fs::File::create(&full).unwrap();
}

#[tokio::test]
async fn test_enqueue_unknown_item_fails() {
    let (downloader, _temp_dir) = create_test_downloader().await;

    let err = downloader.enqueue(ItemId(999)).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Download(DownloadError::ItemNotFound { id: 999 })
    ));
}

#[tokio::test]
async fn test_enqueue_rejects_item_that_does_not_fit() {
    let (downloader, space, _temp_dir) = create_test_downloader_with(|_| {}).await;
    space.set(3 * GIB);

    let item = seed_item(
        &downloader,
        "big",
        "https://cdn.example.com/big.mp3",
        Some((5 * GIB) as i64),
    )
    .await;

    match downloader.enqueue(item).await.unwrap_err() {
        Error::InsufficientSpace {
            required,
            available,
        } => {
            assert_eq!(required, 6 * GIB);
            assert_eq!(available, 3 * GIB);
        }
        other => panic!("expected InsufficientSpace, got {other:?}"),
    }

    // Nothing was recorded
    assert!(downloader.db.get_download_by_item(item).await.unwrap().is_none());
}

#[tokio::test]
async fn test_enqueue_unknown_size_skips_space_check() {
    let (downloader, space, _temp_dir) = create_test_downloader_with(|_| {}).await;
    space.set(0);

    let item = seed_item(&downloader, "nosize", "https://cdn.example.com/n.mp3", None).await;
    let download = downloader.enqueue(item).await.unwrap();
    assert_eq!(download.status, Status::Pending);
}

#[tokio::test]
async fn test_enqueue_requeues_failed_download_keeping_retry_count() {
    let (downloader, _temp_dir) = create_test_downloader().await;
    let item = seed_item(&downloader, "g1", "https://cdn.example.com/g1.mp3", None).await;

    let first = downloader.enqueue(item).await.unwrap();
    assert!(downloader.db.claim_download(first.id).await.unwrap());
    assert!(
        downloader
            .db
            .mark_download_failed(first.id, "HTTP 500: Internal Server Error")
            .await
            .unwrap()
    );

    let again = downloader.enqueue(item).await.unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(again.status, Status::Pending);
    assert_eq!(again.retry_count, 1);
    assert_eq!(again.progress, 0.0);
    assert!(again.error_message.is_none());
    assert_eq!(again.file_path, first.file_path);
}

#[tokio::test]
async fn test_enqueue_requeue_does_not_check_space() {
    let (downloader, space, _temp_dir) = create_test_downloader_with(|_| {}).await;
    let item = seed_item(
        &downloader,
        "g1",
        "https://cdn.example.com/g1.mp3",
        Some((2 * GIB) as i64),
    )
    .await;

    let first = downloader.enqueue(item).await.unwrap();
    assert!(downloader.cancel(first.id).await.unwrap());

    space.set(0);
    let again = downloader.enqueue(item).await.unwrap();
    assert_eq!(again.status, Status::Pending);
}

#[tokio::test]
async fn test_enqueue_leaves_completed_download_unchanged() {
    let (downloader, _temp_dir) = create_test_downloader().await;
    let item = seed_item(&downloader, "g1", "https://cdn.example.com/g1.mp3", None).await;

    let first = downloader.enqueue(item).await.unwrap();
    assert!(downloader.db.claim_download(first.id).await.unwrap());
    assert!(
        downloader
            .db
            .mark_download_completed(first.id, 1234)
            .await
            .unwrap()
    );

    let mut events = downloader.subscribe();
    let again = downloader.enqueue(item).await.unwrap();
    assert_eq!(again.status, Status::Completed);
    assert_eq!(again.progress, 1.0);
    assert_eq!(again.file_size, Some(1234));
    assert!(events.try_recv().is_err(), "no event for an unchanged download");
}

#[tokio::test]
async fn test_enqueue_rejected_during_shutdown() {
    let (downloader, _temp_dir) = create_test_downloader().await;
    let item = seed_item(&downloader, "g1", "https://cdn.example.com/g1.mp3", None).await;

    downloader.shutdown().await.unwrap();

    let err = downloader.enqueue(item).await.unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
}
