//! Retention sweep
//!
//! For each subscription, completed downloads are ordered newest first. The
//! first `max_items_to_keep` are always retained. Each older download is
//! deleted when no [`ConsumptionOracle`] is configured, or when the oracle
//! reports it consumed; otherwise it is kept as unplayed. An oracle error
//! keeps the file.
//!
//! One subscription failing never stops the sweep. Empty subscription
//! folders are removed at the end.

mod plex;

pub use plex::PlexOracle;

use crate::db::{CompletedDownload, Database, Subscription};
use crate::error::Result;
use crate::file_manager::FileManager;
use crate::types::RetentionReport;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// External tracker reporting whether a file has been played to completion
#[async_trait]
pub trait ConsumptionOracle: Send + Sync {
    /// Whether the file at `path` has been consumed
    async fn is_consumed(&self, path: &Path) -> Result<bool>;
}

/// Result of sweeping one subscription
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionSweep {
    /// Download records removed
    pub deleted: usize,
    /// Older downloads kept because they are unplayed
    pub kept_unplayed: usize,
    /// Bytes reclaimed on disk
    pub freed_bytes: u64,
    /// Downloads kept because the oracle lookup or path check failed
    pub errors: usize,
}

/// Decides which completed downloads to reclaim
#[derive(Clone)]
pub struct RetentionEvaluator {
    db: Arc<Database>,
    files: Arc<FileManager>,
    oracle: Option<Arc<dyn ConsumptionOracle>>,
}

impl RetentionEvaluator {
    /// Create an evaluator; without an oracle, retention is count-only
    pub fn new(
        db: Arc<Database>,
        files: Arc<FileManager>,
        oracle: Option<Arc<dyn ConsumptionOracle>>,
    ) -> Self {
        Self { db, files, oracle }
    }

    /// Sweep every subscription, then remove empty folders
    pub async fn sweep(&self) -> Result<RetentionReport> {
        let subscriptions = self.db.list_subscriptions().await?;
        let mut report = RetentionReport::default();

        tracing::info!(
            subscriptions = subscriptions.len(),
            oracle = self.oracle.is_some(),
            "Starting retention sweep"
        );

        for subscription in &subscriptions {
            match self.evaluate(subscription).await {
                Ok(sweep) => {
                    report.deleted += sweep.deleted;
                    report.kept_unplayed += sweep.kept_unplayed;
                    report.freed_bytes += sweep.freed_bytes;
                    if sweep.errors > 0 {
                        report.subscriptions_failed += 1;
                    } else {
                        report.subscriptions_evaluated += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        subscription_id = subscription.id.0,
                        title = %subscription.title,
                        error = %e,
                        "Retention failed for subscription"
                    );
                    report.subscriptions_failed += 1;
                }
            }
        }

        let removed_dirs = self.files.cleanup_empty_directories().await;

        tracing::info!(
            deleted = report.deleted,
            kept_unplayed = report.kept_unplayed,
            freed = %crate::utils::format_bytes(report.freed_bytes),
            failed = report.subscriptions_failed,
            removed_dirs,
            "Retention sweep complete"
        );
        Ok(report)
    }

    /// Sweep one subscription
    pub async fn evaluate(&self, subscription: &Subscription) -> Result<SubscriptionSweep> {
        let completed = self.db.list_completed_for_subscription(subscription.id).await?;
        let keep = usize::try_from(subscription.max_items_to_keep.max(1)).unwrap_or(1);

        let mut sweep = SubscriptionSweep::default();
        if completed.len() <= keep {
            return Ok(sweep);
        }

        let (_retained, older) = completed.split_at(keep);
        tracing::debug!(
            subscription_id = subscription.id.0,
            retained = keep,
            candidates = older.len(),
            "Evaluating older downloads"
        );

        for download in older {
            let path = match self.files.resolve(&download.file_path) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(download_id = download.id.0, error = %e, "Skipping download with invalid path");
                    sweep.errors += 1;
                    continue;
                }
            };

            if let Some(oracle) = &self.oracle {
                match oracle.is_consumed(&path).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!(download_id = download.id.0, title = %download.title, "Keeping unplayed download");
                        sweep.kept_unplayed += 1;
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(
                            download_id = download.id.0,
                            title = %download.title,
                            error = %e,
                            "Consumption lookup failed, keeping file"
                        );
                        sweep.errors += 1;
                        continue;
                    }
                }
            }

            sweep.freed_bytes += self.remove(download, &path).await?;
            sweep.deleted += 1;
        }

        Ok(sweep)
    }

    /// Delete the file (best-effort) and the record; returns bytes freed on disk
    async fn remove(&self, download: &CompletedDownload, path: &Path) -> Result<u64> {
        let on_disk = self.files.file_size(path).await;
        let freed = if self.files.delete_file(path).await {
            on_disk.unwrap_or(0)
        } else {
            0
        };

        self.db.delete_download(download.id).await?;
        tracing::info!(
            download_id = download.id.0,
            title = %download.title,
            freed_bytes = freed,
            "Removed download by retention"
        );
        Ok(freed)
    }
}
