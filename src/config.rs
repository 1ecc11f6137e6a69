//! Configuration types for podcast-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// One gibibyte, the unit used by the storage thresholds
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Download behavior configuration (root directory, concurrency, transfer tuning)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root directory for all subscription folders (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum concurrent transfers (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Retry ceiling for failed downloads picked up by the retry sweep (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Timeout spanning one entire transfer (default: 1 hour)
    #[serde(default = "default_transfer_timeout", with = "duration_serde")]
    pub transfer_timeout: Duration,

    /// Size of each write to the destination file in bytes (default: 8 KiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Free space that must remain after a download is admitted (default: 1 GiB)
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,

    /// Accepted relative difference between expected and actual size (default: 0.01)
    ///
    /// Some servers report an imprecise content-length; a finished file within this
    /// fraction of the expected size is still considered complete.
    #[serde(default = "default_size_tolerance")]
    pub size_tolerance: f64,

    /// Minimum byte advance between persisted progress updates (default: 5 MiB)
    #[serde(default = "default_progress_min_bytes")]
    pub progress_min_bytes: u64,

    /// Minimum fractional advance between persisted progress updates (default: 0.05)
    ///
    /// The effective step is the larger of this fraction of the total and
    /// `progress_min_bytes`.
    #[serde(default = "default_progress_min_fraction")]
    pub progress_min_fraction: f64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            max_retries: default_max_retries(),
            transfer_timeout: default_transfer_timeout(),
            chunk_size: default_chunk_size(),
            min_free_space: default_min_free_space(),
            size_tolerance: default_size_tolerance(),
            progress_min_bytes: default_progress_min_bytes(),
            progress_min_fraction: default_progress_min_fraction(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path (default: "./podcast-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Retention sweep configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Whether the retention sweep job is scheduled (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `max_items_to_keep` applied to new subscriptions when none is given (default: 3)
    #[serde(default = "default_max_items_to_keep")]
    pub default_max_items_to_keep: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_max_items_to_keep: default_max_items_to_keep(),
        }
    }
}

/// Intervals for the background jobs
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Feed refresh interval (default: 1 hour)
    #[serde(default = "default_feed_refresh_interval", with = "duration_serde")]
    pub feed_refresh_interval: Duration,

    /// Queue processing interval (default: 5 minutes)
    #[serde(default = "default_queue_interval", with = "duration_serde")]
    pub queue_interval: Duration,

    /// Failed download retry sweep interval (default: 30 minutes)
    #[serde(default = "default_retry_interval", with = "duration_serde")]
    pub retry_interval: Duration,

    /// Retention sweep interval (default: 24 hours)
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,

    /// Disk space check interval (default: 1 hour)
    #[serde(default = "default_disk_check_interval", with = "duration_serde")]
    pub disk_check_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            feed_refresh_interval: default_feed_refresh_interval(),
            queue_interval: default_queue_interval(),
            retry_interval: default_retry_interval(),
            cleanup_interval: default_cleanup_interval(),
            disk_check_interval: default_disk_check_interval(),
        }
    }
}

/// Plex Media Server connection used as the consumption oracle
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlexConfig {
    /// Server base URL (e.g., "http://192.168.1.100:32400")
    pub url: String,

    /// Authentication token sent as `X-Plex-Token`
    pub token: String,

    /// Name of the library section holding the downloaded files (default: "Podcasts")
    #[serde(default = "default_plex_library")]
    pub library: String,

    /// Per-request timeout (default: 10 seconds)
    #[serde(default = "default_plex_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

/// Retry configuration for transient lookup failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for PodcastDownloader
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig): root directory, concurrency, transfer tuning
/// - [`persistence`](PersistenceConfig): database location
/// - [`retention`](RetentionConfig): retention sweep defaults
/// - [`schedule`](ScheduleConfig): background job intervals
/// - [`plex`](PlexConfig): optional consumption oracle
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Data storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Retention sweep settings
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Background job intervals
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Retry policy for oracle lookups
    #[serde(default)]
    pub retry: RetryConfig,

    /// Plex consumption oracle (None = count-only retention)
    #[serde(default)]
    pub plex: Option<PlexConfig>,
}

impl Config {
    /// Download root directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(config_error(
                "max_concurrent_downloads must be at least 1",
                "max_concurrent_downloads",
            ));
        }
        if self.download.chunk_size == 0 {
            return Err(config_error("chunk_size must be at least 1", "chunk_size"));
        }
        if !(0.0..1.0).contains(&self.download.size_tolerance) {
            return Err(config_error(
                "size_tolerance must be within [0, 1)",
                "size_tolerance",
            ));
        }
        if !(0.0..=1.0).contains(&self.download.progress_min_fraction) {
            return Err(config_error(
                "progress_min_fraction must be within [0, 1]",
                "progress_min_fraction",
            ));
        }
        if self.download.transfer_timeout.is_zero() {
            return Err(config_error(
                "transfer_timeout must be non-zero",
                "transfer_timeout",
            ));
        }
        for (key, interval) in [
            ("feed_refresh_interval", self.schedule.feed_refresh_interval),
            ("queue_interval", self.schedule.queue_interval),
            ("retry_interval", self.schedule.retry_interval),
            ("cleanup_interval", self.schedule.cleanup_interval),
            ("disk_check_interval", self.schedule.disk_check_interval),
        ] {
            if interval.is_zero() {
                return Err(config_error(format!("{key} must be non-zero"), key));
            }
        }
        if self.retention.default_max_items_to_keep == 0 {
            return Err(config_error(
                "default_max_items_to_keep must be at least 1",
                "default_max_items_to_keep",
            ));
        }
        if let Some(plex) = &self.plex
            && url::Url::parse(&plex.url).is_err()
        {
            return Err(config_error(
                format!("invalid Plex URL: {}", plex.url),
                "plex.url",
            ));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>, key: &str) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

// Default value functions
fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./podcast-dl.db")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_transfer_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_chunk_size() -> usize {
    8 * 1024
}

fn default_min_free_space() -> u64 {
    GIB
}

fn default_size_tolerance() -> f64 {
    0.01
}

fn default_progress_min_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_progress_min_fraction() -> f64 {
    0.05
}

fn default_max_items_to_keep() -> u32 {
    3
}

fn default_feed_refresh_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_queue_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(1800)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(86400)
}

fn default_disk_check_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_plex_library() -> String {
    "Podcasts".to_string()
}

fn default_plex_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
