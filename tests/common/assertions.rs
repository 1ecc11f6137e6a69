//! Waiting helpers and assertions for integration tests

use podcast_dl::{DownloadId, Event, PodcastDownloader, Status};
use std::time::Duration;

/// Poll the store until a download reaches `status`
pub async fn wait_for_status(
    downloader: &PodcastDownloader,
    id: DownloadId,
    status: Status,
    timeout: Duration,
) -> bool {
    let result = tokio::time::timeout(timeout, async {
        loop {
            if let Ok(Some(download)) = downloader.get_download(id).await
                && download.status == status
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    result.is_ok()
}

/// Collect all events until timeout or predicate is satisfied
pub async fn collect_events_until<F>(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    timeout: Duration,
    stop_predicate: F,
) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    let mut collected = Vec::new();

    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let should_stop = stop_predicate(&event);
            collected.push(event);
            if should_stop {
                break;
            }
        }
    })
    .await;

    collected
}

/// Assert a download's status, with its error message on mismatch
pub async fn assert_download_status(
    downloader: &PodcastDownloader,
    id: DownloadId,
    expected: Status,
) {
    let download = downloader
        .get_download(id)
        .await
        .expect("query download")
        .expect("download exists");
    assert_eq!(
        download.status, expected,
        "download {} is {} (error: {:?})",
        id, download.status, download.error_message
    );
}
