//! # podcast-dl
//!
//! Download orchestration core for podcast subscriptions.
//!
//! ## Overview
//!
//! podcast-dl keeps a local library of podcast media in sync with a set of
//! feeds:
//! - **Discovery** - subscriptions are refreshed through a pluggable
//!   [`FeedSource`](discovery::FeedSource); new items are stored and, with
//!   auto-download, admitted to the queue
//! - **Orchestration** - [`PodcastDownloader`] admits downloads, dispatches
//!   them through a bounded concurrency gate and owns every status transition
//! - **Transfer** - resumable HTTP streaming with redirect probing,
//!   signed-URL handling and size verification
//! - **Retention** - completed downloads beyond a per-subscription floor are
//!   reclaimed, optionally only once a [`ConsumptionOracle`](retention::ConsumptionOracle)
//!   such as Plex reports them played
//! - **Scheduling** - [`JobScheduler`](scheduler::JobScheduler) drives all of
//!   the above on fixed intervals
//!
//! Consumers subscribe to [`Event`]s instead of polling.
//!
//! ## Quick Start
//!
//! ```no_run
//! use podcast_dl::{Config, PodcastDownloader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.download.download_dir = "/srv/podcasts".into();
//!     config.download.max_concurrent_downloads = 2;
//!
//!     let downloader = PodcastDownloader::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     downloader.run_queue().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Feed snapshots and new-item selection
pub mod discovery;
/// Core downloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Path planning and storage accounting
pub mod file_manager;
/// Retention sweep and consumption oracles
pub mod retention;
/// Retry logic with exponential backoff
pub mod retry;
/// Background job scheduling
pub mod scheduler;
/// Resumable HTTP transfers
pub mod transfer;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, PlexConfig, RetentionConfig, ScheduleConfig};
pub use db::{Database, Download, Item, Subscription};
pub use discovery::{FeedSnapshot, FeedSource, ItemMetadata};
pub use downloader::PodcastDownloader;
pub use error::{DatabaseError, DownloadError, Error, Result};
pub use file_manager::FileManager;
pub use retention::{ConsumptionOracle, PlexOracle, RetentionEvaluator};
pub use scheduler::{JobKind, JobScheduler};
pub use types::{
    DiskSpaceLevel, DownloadId, Event, ItemId, RefreshReport, RetentionReport, Status,
    SubscriptionId,
};

/// Run the background jobs until a termination signal, then shut down.
///
/// Starts a [`JobScheduler`] over the downloader using the configured
/// intervals, waits for a signal, stops the downloader (cancelling in-flight
/// transfers) and finally the scheduler.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to whichever one
///   can be registered.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use podcast_dl::{Config, PodcastDownloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = PodcastDownloader::new(Config::default()).await?;
///     run_with_shutdown(downloader).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: PodcastDownloader) -> Result<()> {
    let schedule = downloader.get_config().schedule.clone();
    let scheduler = JobScheduler::start(std::sync::Arc::new(downloader.clone()), &schedule);

    wait_for_signal().await;

    downloader.shutdown().await?;
    scheduler.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
