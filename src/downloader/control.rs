//! Download control: cancel, delete, retry, and read-side queries.

use crate::db::{Download, Item, Subscription};
use crate::error::{DownloadError, Error, Result};
use crate::types::{DownloadId, Event, Status, SubscriptionId};
use std::path::PathBuf;

use super::PodcastDownloader;

impl PodcastDownloader {
    /// Cancel a pending or in-flight download
    ///
    /// Flips the record to `deleted` and signals the transfer's cancellation
    /// token; the transfer stops at its next chunk and leaves its partial file
    /// in place. Returns `Ok(false)` for a download that is `completed` (a
    /// finished file cannot be discarded through cancel), `failed` or already
    /// `deleted`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use podcast_dl::*;
    /// # async fn example(downloader: PodcastDownloader, id: DownloadId) -> Result<()> {
    /// if !downloader.cancel(id).await? {
    ///     println!("nothing to cancel");
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn cancel(&self, id: DownloadId) -> Result<bool> {
        let download = self.require_download(id).await?;

        if download.status == Status::Completed {
            tracing::warn!(download_id = id.0, "Cannot cancel completed download");
            return Ok(false);
        }

        let cancelled = self.db.cancel_download(id).await?;
        if !cancelled {
            tracing::debug!(download_id = id.0, status = %download.status, "Download not cancellable");
            return Ok(false);
        }

        if let Some(token) = self.queue_state.active_downloads.lock().await.get(&id) {
            token.cancel();
        }

        tracing::info!(download_id = id.0, "Cancelled download");
        self.emit_event(Event::Cancelled { id });
        Ok(true)
    }

    /// Remove a download record, optionally deleting its file
    ///
    /// File removal is best-effort: a file that cannot be deleted is logged and
    /// the record is removed anyway.
    pub async fn delete(&self, id: DownloadId, delete_file: bool) -> Result<bool> {
        let download = self.require_download(id).await?;

        if let Some(token) = self.queue_state.active_downloads.lock().await.get(&id) {
            token.cancel();
        }

        if delete_file {
            match self.files.resolve(&download.file_path) {
                Ok(path) => {
                    self.files.delete_file(&path).await;
                }
                Err(e) => {
                    tracing::warn!(download_id = id.0, error = %e, "Not deleting file outside download root");
                }
            }
        }

        let removed = self.db.delete_download(id).await?;
        if removed {
            tracing::info!(download_id = id.0, delete_file, "Deleted download");
            self.emit_event(Event::Removed { id });
        }
        Ok(removed)
    }

    /// Re-admit failed downloads that are under `max_retries` and process the queue
    ///
    /// Candidates are reset to `pending` (cleared error, zero progress) in
    /// order of their last update; the retry counter is kept. Returns the
    /// number of downloads reset.
    pub async fn retry_failed(&self, max_retries: u32) -> Result<usize> {
        let candidates = self.db.list_retryable_downloads(max_retries).await?;
        if candidates.is_empty() {
            tracing::debug!("No failed downloads to retry");
            return Ok(0);
        }

        let mut requeued = 0usize;
        for download in candidates {
            if self.db.requeue_download(download.id).await? {
                tracing::info!(
                    download_id = download.id.0,
                    retry_count = download.retry_count,
                    "Retrying failed download"
                );
                self.emit_event(Event::Queued {
                    id: download.id,
                    item_id: download.item_id,
                    path: PathBuf::from(&download.file_path),
                });
                requeued += 1;
            }
        }

        if requeued > 0 {
            self.run_queue().await?;
        }

        Ok(requeued)
    }

    /// Get a download by ID
    pub async fn get_download(&self, id: DownloadId) -> Result<Option<Download>> {
        self.db.get_download(id).await
    }

    /// Page through downloads, newest first
    pub async fn list_downloads(
        &self,
        status: Option<Status>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Download>> {
        self.db.list_downloads(status, offset, limit).await
    }

    /// All subscriptions
    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.db.list_subscriptions().await
    }

    /// Items of a subscription, newest first
    pub async fn list_items(
        &self,
        subscription_id: SubscriptionId,
        limit: Option<i64>,
    ) -> Result<Vec<Item>> {
        self.db.list_items(subscription_id, limit).await
    }

    async fn require_download(&self, id: DownloadId) -> Result<Download> {
        self.db
            .get_download(id)
            .await?
            .ok_or(Error::Download(DownloadError::NotFound { id: id.0 }))
    }
}
