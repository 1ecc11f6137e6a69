//! Download admission and the free-space gate.

use crate::db::{Download, NewDownload};
use crate::error::{DatabaseError, DownloadError, Error, Result};
use crate::file_manager::FileManager;
use crate::types::{Event, ItemId};
use crate::utils::format_bytes;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use super::PodcastDownloader;

/// Candidate paths tried before giving up on an item
const MAX_PATH_ATTEMPTS: u32 = 16;

impl PodcastDownloader {
    /// Admit an item for download
    ///
    /// Idempotent per item:
    /// - an existing `pending`, `downloading` or `completed` download is returned unchanged
    /// - a `failed` or `deleted` download is reset to `pending` with zero progress
    /// - otherwise a new `pending` record is created at the path the file manager plans;
    ///   when another download owns that path or a file already sits there, the
    ///   item ID is appended to the file name
    ///
    /// # Errors
    ///
    /// - [`DownloadError::ItemNotFound`] if the item does not exist
    /// - [`Error::InsufficientSpace`] if the item's declared size plus the
    ///   free-space buffer exceeds the available space
    /// - [`Error::ShuttingDown`] once shutdown has begun
    pub async fn enqueue(&self, item_id: ItemId) -> Result<Download> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let item = self
            .db
            .get_item(item_id)
            .await?
            .ok_or(Error::Download(DownloadError::ItemNotFound { id: item_id.0 }))?;

        if let Some(existing) = self.db.get_download_by_item(item_id).await? {
            if !existing.status.is_requeueable() {
                tracing::debug!(
                    download_id = existing.id.0,
                    status = %existing.status,
                    "Item already has a download, leaving it unchanged"
                );
                return Ok(existing);
            }

            if self.db.requeue_download(existing.id).await? {
                tracing::info!(
                    download_id = existing.id.0,
                    title = %item.title,
                    retry_count = existing.retry_count,
                    "Re-queued download"
                );
                self.emit_event(Event::Queued {
                    id: existing.id,
                    item_id,
                    path: PathBuf::from(&existing.file_path),
                });
            }
            return self.fetch_download_for_item(item_id).await;
        }

        let subscription = self
            .db
            .get_subscription(item.subscription_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("subscription {} of item {}", item.subscription_id, item_id))
            })?;

        let planned = self.files.path_for(&item, &subscription).await?;

        if let Some(size) = item.file_size.filter(|size| *size > 0) {
            self.ensure_space_for(size as u64)?;
        }

        let mut attempt = 0;
        let (id, file_path) = loop {
            if attempt >= MAX_PATH_ATTEMPTS {
                return Err(Error::Other(format!(
                    "no free file path for item {} near {}",
                    item_id, planned
                )));
            }
            let candidate = FileManager::disambiguate(&planned, item_id, attempt);
            attempt += 1;

            let taken = self.db.is_path_claimed(&candidate).await?
                || self.files.is_occupied(&candidate).await?;
            if taken {
                tracing::debug!(item_id = item_id.0, path = %candidate, "Planned path taken, trying another");
                continue;
            }

            match self
                .db
                .insert_download(&NewDownload {
                    item_id,
                    file_path: candidate.clone(),
                    file_size: item.file_size,
                })
                .await
            {
                Ok(id) => break (id, candidate),
                Err(Error::Database(DatabaseError::ConstraintViolation(_))) => {
                    // Lost a race: either this item was enqueued concurrently
                    // or another item claimed the same path
                    if let Some(existing) = self.db.get_download_by_item(item_id).await? {
                        return Ok(existing);
                    }
                }
                Err(e) => return Err(e),
            }
        };

        tracing::info!(
            download_id = id.0,
            item_id = item_id.0,
            title = %item.title,
            path = %file_path,
            "Queued download"
        );
        self.emit_event(Event::Queued {
            id,
            item_id,
            path: PathBuf::from(&file_path),
        });

        self.db
            .get_download(id)
            .await?
            .ok_or(Error::Download(DownloadError::NotFound { id: id.0 }))
    }

    /// Fail with [`Error::InsufficientSpace`] unless `size` plus the
    /// configured buffer fits in the available space
    ///
    /// The space is checked, not reserved.
    pub(crate) fn ensure_space_for(&self, size: u64) -> Result<()> {
        let required = size.saturating_add(self.config.download.min_free_space);
        let available = self.files.available_space()?;

        if available < required {
            tracing::error!(
                required = %format_bytes(required),
                available = %format_bytes(available),
                "Insufficient disk space for download"
            );
            return Err(Error::InsufficientSpace {
                required,
                available,
            });
        }

        Ok(())
    }

    async fn fetch_download_for_item(&self, item_id: ItemId) -> Result<Download> {
        self.db
            .get_download_by_item(item_id)
            .await?
            .ok_or_else(|| {
                Error::Database(DatabaseError::NotFound(format!(
                    "download for item {}",
                    item_id
                )))
            })
    }
}
