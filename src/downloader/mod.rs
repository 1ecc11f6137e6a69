//! Core downloader implementation split into focused submodules.
//!
//! The `PodcastDownloader` struct and its methods are organized by domain:
//! - [`queue`] - Admission (`enqueue`) and the disk space gate
//! - [`queue_processor`] - Dispatching pending downloads through the concurrency gate
//! - [`download_task`] - One transfer and its conditional finalization
//! - [`control`] - Cancel, delete, retry and listing
//! - [`subscriptions`] - Subscription management and item discovery
//! - [`maintenance`] - Retention sweep and disk space check
//! - [`lifecycle`] - Startup restore and shutdown coordination

mod control;
mod download_task;
mod lifecycle;
mod maintenance;
mod queue;
mod queue_processor;
mod subscriptions;

pub use subscriptions::{MAX_ITEMS_TO_KEEP, clamp_items_to_keep};

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::db::Database;
use crate::discovery::FeedSource;
use crate::error::{Error, Result};
use crate::file_manager::FileManager;
use crate::retention::{ConsumptionOracle, PlexOracle};
use crate::transfer::TransferExecutor;
use crate::types::{DownloadId, Event};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Concurrency gate and in-flight transfer tracking
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Semaphore bounding simultaneous transfers (max_concurrent_downloads)
    pub(crate) concurrent_limit: Arc<Semaphore>,
    /// Cancellation tokens of transfers currently running
    pub(crate) active_downloads: Arc<Mutex<HashMap<DownloadId, CancellationToken>>>,
    /// Cleared during shutdown; no new admissions or dispatches after that
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl QueueState {
    pub(crate) fn new(max_concurrent: usize) -> Self {
        Self {
            concurrent_limit: Arc::new(Semaphore::new(max_concurrent)),
            active_downloads: Arc::new(Mutex::new(HashMap::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
        }
    }
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped or cheap)
#[derive(Clone)]
pub struct PodcastDownloader {
    /// Database instance for persistence
    /// Public for integration tests to query download status
    pub db: Arc<Database>,
    /// Path planning and storage accounting under the download root
    pub(crate) files: Arc<FileManager>,
    /// HTTP transfer engine
    pub(crate) transfer: TransferExecutor,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Concurrency gate and active transfers
    pub(crate) queue_state: QueueState,
    /// Feed fetcher used by subscription operations
    pub(crate) feed_source: Option<Arc<dyn FeedSource>>,
    /// Playback tracker consulted by the retention sweep
    pub(crate) oracle: Option<Arc<dyn ConsumptionOracle>>,
}

impl PodcastDownloader {
    /// Create a new PodcastDownloader instance
    ///
    /// This initializes all core components:
    /// - Validates the configuration
    /// - Creates the download root
    /// - Opens/creates the SQLite database and runs migrations
    /// - Builds the Plex consumption oracle when configured
    /// - Returns downloads interrupted by a previous crash to `pending`
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.download.download_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download.download_dir.display(),
                        e
                    ),
                ))
            })?;
        let files = FileManager::new(config.download.download_dir.clone()).await?;

        let db = Database::new(&config.persistence.database_path).await?;
        let transfer = TransferExecutor::new(config.download.clone())?;

        let oracle: Option<Arc<dyn ConsumptionOracle>> = match &config.plex {
            Some(plex) => {
                let oracle = PlexOracle::new(plex.clone(), config.retry.clone())?;
                tracing::info!(url = %plex.url, library = %plex.library, "Plex consumption oracle enabled");
                Some(Arc::new(oracle))
            }
            None => None,
        };

        let downloader = Self::from_parts(config, db, files, transfer, oracle);
        downloader.restore_interrupted().await?;
        Ok(downloader)
    }

    pub(crate) fn from_parts(
        config: Config,
        db: Database,
        files: FileManager,
        transfer: TransferExecutor,
        oracle: Option<Arc<dyn ConsumptionOracle>>,
    ) -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let queue_state = QueueState::new(config.download.max_concurrent_downloads);

        Self {
            db: Arc::new(db),
            files: Arc::new(files),
            transfer,
            event_tx,
            config: Arc::new(config),
            queue_state,
            feed_source: None,
            oracle,
        }
    }

    /// Attach the feed fetcher used by subscription operations
    pub fn with_feed_source(mut self, source: Arc<dyn FeedSource>) -> Self {
        self.feed_source = Some(source);
        self
    }

    /// Replace the consumption oracle used by the retention sweep
    pub fn with_oracle(mut self, oracle: Arc<dyn ConsumptionOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Subscribe to download events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// A subscriber that falls more than 1000 events behind receives
    /// `RecvError::Lagged`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use podcast_dl::{PodcastDownloader, Config};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = PodcastDownloader::new(Config::default()).await?;
    ///
    ///     let mut events = downloader.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             tracing::info!(?event, "download event");
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// File manager for the download root
    pub fn files(&self) -> &FileManager {
        &self.files
    }

    /// Emit an event to all subscribers
    ///
    /// Events are dropped silently when nobody is listening.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    pub(crate) fn feed_source(&self) -> Result<&Arc<dyn FeedSource>> {
        self.feed_source.as_ref().ok_or_else(|| Error::Config {
            message: "no feed source configured".to_string(),
            key: Some("feed_source".to_string()),
        })
    }
}
