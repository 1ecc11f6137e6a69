//! Database layer for podcast-dl
//!
//! Handles SQLite persistence for subscriptions, items and download records.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`subscriptions`]: Subscription CRUD
//! - [`items`]: Item insertion (duplicate-tolerant) and lookups
//! - [`downloads`]: Download records and their status transitions
//!
//! Every status transition is a single conditional `UPDATE ... WHERE status = ?`,
//! so two writers racing on the same record cannot both succeed.

use crate::types::{DownloadId, ItemId, Status, SubscriptionId};
use sqlx::{FromRow, sqlite::SqlitePool};

mod downloads;
mod items;
mod migrations;
mod subscriptions;

/// New subscription to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewSubscription {
    /// Display title from the feed
    pub title: String,
    /// Feed URL (unique)
    pub feed_url: String,
    /// Sanitized storage folder, derived once and never changed
    pub folder_name: String,
    /// Number of newest completed downloads always retained (>= 1)
    pub max_items_to_keep: i64,
    /// Queue new items automatically after each refresh
    pub auto_download: bool,
}

/// Subscription record from database
#[derive(Debug, Clone, FromRow)]
pub struct Subscription {
    /// Unique database ID
    pub id: SubscriptionId,
    /// Display title (refreshed from the feed)
    pub title: String,
    /// Feed URL
    pub feed_url: String,
    /// Storage folder relative to the download root
    pub folder_name: String,
    /// Retention floor
    pub max_items_to_keep: i64,
    /// Queue new items automatically after each refresh
    pub auto_download: bool,
    /// Unix timestamp of the last successful refresh
    pub last_checked: Option<i64>,
    /// Unix timestamp when the subscription was created
    pub created_at: i64,
}

/// New item to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewItem {
    /// Owning subscription
    pub subscription_id: SubscriptionId,
    /// Globally unique identifier from the feed
    pub guid: String,
    /// Item title
    pub title: String,
    /// Unix timestamp of publication
    pub pub_date: Option<i64>,
    /// Media enclosure URL
    pub media_url: String,
    /// Declared size in bytes
    pub file_size: Option<i64>,
    /// Declared MIME type
    pub mime_type: Option<String>,
    /// Episode number within its season
    pub episode_number: Option<i64>,
    /// Season number
    pub season_number: Option<i64>,
}

/// Item record from database
#[derive(Debug, Clone, FromRow)]
pub struct Item {
    /// Unique database ID
    pub id: ItemId,
    /// Owning subscription
    pub subscription_id: SubscriptionId,
    /// Globally unique identifier from the feed
    pub guid: String,
    /// Item title
    pub title: String,
    /// Unix timestamp of publication
    pub pub_date: Option<i64>,
    /// Media enclosure URL
    pub media_url: String,
    /// Declared size in bytes
    pub file_size: Option<i64>,
    /// Declared MIME type
    pub mime_type: Option<String>,
    /// Episode number within its season
    pub episode_number: Option<i64>,
    /// Season number
    pub season_number: Option<i64>,
    /// Unix timestamp when the item was discovered
    pub created_at: i64,
}

/// New download to be inserted into the database (always starts pending)
#[derive(Debug, Clone)]
pub struct NewDownload {
    /// Item being downloaded (at most one download per item)
    pub item_id: ItemId,
    /// Destination path relative to the download root
    pub file_path: String,
    /// Declared size in bytes, if known
    pub file_size: Option<i64>,
}

/// Download record from database
#[derive(Debug, Clone, FromRow)]
pub struct Download {
    /// Unique database ID
    pub id: DownloadId,
    /// Item being downloaded
    pub item_id: ItemId,
    /// Lifecycle status
    pub status: Status,
    /// Destination path relative to the download root (stable for resume)
    pub file_path: String,
    /// Declared size until completion, actual size afterwards
    pub file_size: Option<i64>,
    /// Fraction complete (0.0-1.0); exactly 1.0 only when completed
    pub progress: f64,
    /// Error message from the last failed attempt
    pub error_message: Option<String>,
    /// Number of failed attempts
    pub retry_count: i64,
    /// Unix timestamp when the record was created
    pub created_at: i64,
    /// Unix timestamp of the last mutation
    pub updated_at: i64,
    /// Unix timestamp when the last transfer started
    pub started_at: Option<i64>,
    /// Unix timestamp when the transfer completed
    pub completed_at: Option<i64>,
}

/// Completed download joined with the item fields retention ordering needs
#[derive(Debug, Clone, FromRow)]
pub struct CompletedDownload {
    /// Download ID
    pub id: DownloadId,
    /// Item ID
    pub item_id: ItemId,
    /// Item title (for logging)
    pub title: String,
    /// Destination path relative to the download root
    pub file_path: String,
    /// Recorded size in bytes
    pub file_size: Option<i64>,
    /// Item publication timestamp
    pub pub_date: Option<i64>,
}

/// Database handle
pub struct Database {
    pool: SqlitePool,
}

/// Whether a sqlx error is a UNIQUE constraint violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
