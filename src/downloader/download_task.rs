//! Download task: one transfer and its conditional finalization.
//!
//! Every finalizing write is conditional on the record still being
//! `downloading`, so a download cancelled or deleted while its bytes were in
//! flight is never resurrected.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::db::{Database, Download};
use crate::error::{DownloadError, Error};
use crate::transfer::ProgressSink;
use crate::types::{DownloadId, Event};

use super::PodcastDownloader;

/// Persists throttled progress and mirrors it onto the event channel
struct RecordProgress {
    db: Arc<Database>,
    event_tx: broadcast::Sender<Event>,
}

#[async_trait]
impl ProgressSink for RecordProgress {
    async fn report(&self, id: DownloadId, downloaded: u64, total: u64, fraction: f64) {
        match self.db.update_download_progress(id, fraction).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(download_id = id.0, "Progress ignored, download no longer active");
                return;
            }
            Err(e) => {
                tracing::warn!(download_id = id.0, error = %e, "Failed to persist progress");
            }
        }

        self.event_tx
            .send(Event::Progress {
                id,
                downloaded_bytes: downloaded,
                total_bytes: Some(total),
                progress: fraction,
            })
            .ok();
    }
}

/// Message stored on a failed download
///
/// Transfer errors are recorded without the top-level "download error:"
/// prefix so the record reads e.g. "HTTP 404: Not Found".
fn failure_message(err: &Error) -> String {
    match err {
        Error::Download(inner) => inner.to_string(),
        other => other.to_string(),
    }
}

/// Run one claimed download to completion, failure or cancellation
pub(super) async fn run_download_task(
    downloader: PodcastDownloader,
    download: Download,
    cancel_token: CancellationToken,
) {
    let id = download.id;
    downloader.emit_event(Event::Started { id });

    let result = transfer(&downloader, &download, &cancel_token).await;

    match result {
        Ok((path, size_bytes)) => match downloader.db.mark_download_completed(id, size_bytes).await {
            Ok(true) => {
                tracing::info!(download_id = id.0, size_bytes, path = %path.display(), "Download completed");
                downloader.emit_event(Event::Completed {
                    id,
                    path,
                    size_bytes,
                });
            }
            Ok(false) => {
                tracing::info!(download_id = id.0, "Download was cancelled during transfer, not completing");
            }
            Err(e) => {
                tracing::error!(download_id = id.0, error = %e, "Failed to mark download completed");
            }
        },
        Err(Error::Download(DownloadError::Cancelled { .. })) => {
            tracing::info!(download_id = id.0, "Transfer stopped by cancellation");
        }
        Err(e) => {
            let message = failure_message(&e);
            tracing::warn!(download_id = id.0, error = %message, "Download failed");
            record_failure(&downloader, id, &message).await;
        }
    }

    downloader
        .queue_state
        .active_downloads
        .lock()
        .await
        .remove(&id);
}

async fn transfer(
    downloader: &PodcastDownloader,
    download: &Download,
    cancel_token: &CancellationToken,
) -> crate::Result<(std::path::PathBuf, u64)> {
    let item = downloader
        .db
        .get_item(download.item_id)
        .await?
        .ok_or(Error::Download(DownloadError::ItemNotFound {
            id: download.item_id.0,
        }))?;

    let destination = downloader.files.resolve(&download.file_path)?;

    tracing::info!(
        download_id = download.id.0,
        title = %item.title,
        path = %destination.display(),
        "Starting transfer"
    );

    let sink = RecordProgress {
        db: Arc::clone(&downloader.db),
        event_tx: downloader.event_tx.clone(),
    };

    let outcome = downloader
        .transfer
        .execute(download.id, &item.media_url, &destination, &sink, cancel_token)
        .await?;

    if outcome.already_complete {
        tracing::info!(download_id = download.id.0, "File already complete on disk");
    }

    Ok((destination, outcome.size_bytes))
}

async fn record_failure(downloader: &PodcastDownloader, id: DownloadId, message: &str) {
    match downloader.db.mark_download_failed(id, message).await {
        Ok(true) => {
            let retry_count = match downloader.db.get_download(id).await {
                Ok(Some(download)) => download.retry_count,
                _ => 0,
            };
            downloader.emit_event(Event::Failed {
                id,
                error: message.to_string(),
                retry_count,
            });
        }
        Ok(false) => {
            tracing::info!(download_id = id.0, "Download was cancelled during transfer, not recording failure");
        }
        Err(e) => {
            tracing::error!(download_id = id.0, error = %e, "Failed to mark download failed");
        }
    }
}
