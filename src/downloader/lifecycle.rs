//! Startup and shutdown coordination.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::error::Result;

use super::PodcastDownloader;

/// How long shutdown waits for in-flight transfers to drain
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for transfers to drain
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl PodcastDownloader {
    /// Return downloads interrupted by a previous crash to `pending`
    ///
    /// Called automatically by [`PodcastDownloader::new`]. Partial files stay
    /// on disk; the next [`run_queue`](PodcastDownloader::run_queue) resumes them.
    pub async fn restore_interrupted(&self) -> Result<u64> {
        let restored = self.db.reset_interrupted_downloads().await?;
        if restored > 0 {
            tracing::info!(restored, "Restored interrupted downloads to pending");
        } else {
            tracing::debug!("No interrupted downloads to restore");
        }
        Ok(restored)
    }

    /// Whether new admissions and dispatches are accepted
    pub fn is_accepting(&self) -> bool {
        self.queue_state.accepting_new.load(Ordering::SeqCst)
    }

    /// Gracefully shut down the downloader
    ///
    /// 1. Stops accepting new downloads
    /// 2. Cancels every in-flight transfer (each stops at its next chunk)
    /// 3. Waits up to 30 seconds for the transfers to drain
    ///
    /// Records of interrupted transfers stay `downloading` and are restored to
    /// `pending` on the next start.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.queue_state.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new downloads");

        {
            let active = self.queue_state.active_downloads.lock().await;
            tracing::debug!(active_count = active.len(), "Cancelling active transfers");
            for token in active.values() {
                token.cancel();
            }
        }

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_active_downloads()).await {
            Ok(()) => tracing::info!("All active transfers stopped"),
            Err(_) => tracing::warn!("Timeout waiting for transfers to stop, proceeding with shutdown"),
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    async fn wait_for_active_downloads(&self) {
        loop {
            let active_count = self.queue_state.active_downloads.lock().await.len();
            if active_count == 0 {
                return;
            }
            tracing::debug!(active_count, "Waiting for active transfers to stop");
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}
