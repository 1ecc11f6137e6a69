//! Queue processor: dispatches pending downloads through the concurrency gate.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::PodcastDownloader;
use super::download_task::run_download_task;

impl PodcastDownloader {
    /// Dispatch every pending download and wait for the transfers to finish
    ///
    /// Pending downloads are taken oldest first. For each one the processor:
    /// 1. Acquires a permit from the concurrency gate (waits while all slots are busy)
    /// 2. Claims the record (`pending` -> `downloading`); a record claimed or
    ///    cancelled elsewhere is skipped and its permit released
    /// 3. Registers a cancellation token and spawns the transfer, which holds
    ///    the permit until it finalizes
    ///
    /// A failing or panicking transfer never affects its siblings. Returns the
    /// number of downloads dispatched.
    pub async fn run_queue(&self) -> crate::Result<usize> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            tracing::debug!("Shutdown in progress, not dispatching downloads");
            return Ok(0);
        }

        let pending = self.db.list_pending_downloads().await?;
        if pending.is_empty() {
            tracing::debug!("No pending downloads");
            return Ok(0);
        }

        tracing::info!(count = pending.len(), "Processing pending downloads");

        let mut tasks = JoinSet::new();
        let mut task_downloads = HashMap::new();
        let mut dispatched = 0usize;

        for download in pending {
            let permit = match self.queue_state.concurrent_limit.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!("Concurrency gate closed, stopping dispatch");
                    break;
                }
            };

            if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
                tracing::info!("Shutdown requested, stopping dispatch");
                break;
            }

            let id = download.id;
            match self.db.claim_download(id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(download_id = id.0, "Download no longer pending, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::error!(download_id = id.0, error = %e, "Failed to claim download");
                    continue;
                }
            }

            let cancel_token = CancellationToken::new();
            {
                let mut active = self.queue_state.active_downloads.lock().await;
                active.insert(id, cancel_token.clone());
            }

            let downloader = self.clone();
            let handle = tasks.spawn(async move {
                let _permit = permit;
                run_download_task(downloader, download, cancel_token).await;
            });
            task_downloads.insert(handle.id(), id);
            dispatched += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            let Err(e) = joined else { continue };
            let Some(id) = task_downloads.get(&e.id()).copied() else {
                tracing::error!(error = %e, "Download task failed");
                continue;
            };
            tracing::error!(download_id = id.0, error = %e, "Download task panicked");
            self.queue_state.active_downloads.lock().await.remove(&id);
            if let Err(db_err) = self
                .db
                .mark_download_failed(id, &format!("transfer task panicked: {}", e))
                .await
            {
                tracing::error!(download_id = id.0, error = %db_err, "Failed to record panicked download");
            }
        }

        tracing::info!(dispatched, "Download queue processed");
        Ok(dispatched)
    }
}
