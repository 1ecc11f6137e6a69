//! Download records and their status transitions.
//!
//! Transitions are conditional on the current status and report whether they
//! applied, so callers can tell a lost race from a success.

use crate::error::DatabaseError;
use crate::types::{DownloadId, ItemId, Status, SubscriptionId};
use crate::{Error, Result};

use super::{CompletedDownload, Database, Download, NewDownload, is_unique_violation};

const DOWNLOAD_COLUMNS: &str = "id, item_id, status, file_path, file_size, progress, \
     error_message, retry_count, created_at, updated_at, started_at, completed_at";

// 1.0 is reserved for completed records; in-flight progress stops just short of it.
const MAX_IN_FLIGHT_PROGRESS: f64 = 0.9999;

fn query_failed(what: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("Failed to {}: {}", what, e)))
}

impl Database {
    /// Insert a new download record in `pending` state
    ///
    /// Fails with [`DatabaseError::ConstraintViolation`] when the item already
    /// has a download or another download owns the same file path.
    pub async fn insert_download(&self, download: &NewDownload) -> Result<DownloadId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO downloads (
                item_id, status, file_path, file_size, progress, retry_count,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, 0.0, 0, ?, ?)
            "#,
        )
        .bind(download.item_id)
        .bind(Status::Pending)
        .bind(&download.file_path)
        .bind(download.file_size)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::Database(DatabaseError::ConstraintViolation(format!(
                    "item {} already has a download or path {} is taken",
                    download.item_id, download.file_path
                )))
            } else {
                query_failed("insert download", e)
            }
        })?;

        Ok(DownloadId(result.last_insert_rowid()))
    }

    /// Get a download by ID
    pub async fn get_download(&self, id: DownloadId) -> Result<Option<Download>> {
        sqlx::query_as::<_, Download>(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("get download", e))
    }

    /// Whether any download, in any status, owns `file_path`
    pub async fn is_path_claimed(&self, file_path: &str) -> Result<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM downloads WHERE file_path = ?)")
            .bind(file_path)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| query_failed("check download path", e))
    }

    /// Get the download belonging to an item, if any
    pub async fn get_download_by_item(&self, item_id: ItemId) -> Result<Option<Download>> {
        sqlx::query_as::<_, Download>(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads WHERE item_id = ?"
        ))
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("get download by item", e))
    }

    /// Pending downloads, oldest first
    pub async fn list_pending_downloads(&self) -> Result<Vec<Download>> {
        sqlx::query_as::<_, Download>(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads WHERE status = ? \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(Status::Pending)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list pending downloads", e))
    }

    /// Failed downloads still under the retry ceiling, least recently updated first
    pub async fn list_retryable_downloads(&self, max_retries: u32) -> Result<Vec<Download>> {
        sqlx::query_as::<_, Download>(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads \
             WHERE status = ? AND retry_count < ? \
             ORDER BY updated_at ASC, id ASC"
        ))
        .bind(Status::Failed)
        .bind(i64::from(max_retries))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list retryable downloads", e))
    }

    /// Page through downloads, newest first, optionally filtered by status
    pub async fn list_downloads(
        &self,
        status: Option<Status>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Download>> {
        sqlx::query_as::<_, Download>(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads \
             WHERE (? IS NULL OR status = ?) \
             ORDER BY created_at DESC, id DESC \
             LIMIT ? OFFSET ?"
        ))
        .bind(status)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list downloads", e))
    }

    /// Number of downloads in a given status
    pub async fn count_downloads_by_status(&self, status: Status) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM downloads WHERE status = ?")
            .bind(status)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| query_failed("count downloads", e))
    }

    /// Reset a `failed` or `deleted` download to `pending`
    ///
    /// Progress is zeroed and the error cleared. The retry counter and the
    /// destination path are left untouched.
    pub async fn requeue_download(&self, id: DownloadId) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = ?, progress = 0.0, error_message = NULL, updated_at = ?
            WHERE id = ? AND status IN (?, ?)
            "#,
        )
        .bind(Status::Pending)
        .bind(now)
        .bind(id)
        .bind(Status::Failed)
        .bind(Status::Deleted)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("requeue download", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a `pending` download to `downloading`
    ///
    /// Returns false if the record is no longer pending (claimed elsewhere,
    /// cancelled or deleted).
    pub async fn claim_download(&self, id: DownloadId) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = ?, started_at = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(Status::Downloading)
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(Status::Pending)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("claim download", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist in-flight progress
    ///
    /// Never lowers the stored value and only applies while `downloading`.
    pub async fn update_download_progress(&self, id: DownloadId, progress: f64) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let progress = progress.clamp(0.0, MAX_IN_FLIGHT_PROGRESS);

        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET progress = MAX(progress, ?), updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(progress)
        .bind(now)
        .bind(id)
        .bind(Status::Downloading)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("update download progress", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Finalize a transfer as `completed`
    ///
    /// Applies only while the record is still `downloading`, so a download
    /// cancelled mid-transfer is never resurrected.
    pub async fn mark_download_completed(&self, id: DownloadId, file_size: u64) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = ?, progress = 1.0, file_size = ?, error_message = NULL,
                completed_at = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(Status::Completed)
        .bind(file_size as i64)
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(Status::Downloading)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("mark download completed", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Finalize a transfer as `failed`, incrementing the retry counter once
    ///
    /// Applies only while the record is still `downloading`.
    pub async fn mark_download_failed(&self, id: DownloadId, error: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = ?, error_message = ?, retry_count = retry_count + 1, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(Status::Failed)
        .bind(error)
        .bind(now)
        .bind(id)
        .bind(Status::Downloading)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("mark download failed", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Flip a `pending` or `downloading` download to `deleted`
    pub async fn cancel_download(&self, id: DownloadId) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = ?, updated_at = ?
            WHERE id = ? AND status IN (?, ?)
            "#,
        )
        .bind(Status::Deleted)
        .bind(now)
        .bind(id)
        .bind(Status::Pending)
        .bind(Status::Downloading)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("cancel download", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove a download record
    pub async fn delete_download(&self, id: DownloadId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM downloads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("delete download", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Completed downloads of a subscription in retention order
    ///
    /// Newest publish date first; undated items sort last, ties broken by the
    /// most recently discovered item.
    pub async fn list_completed_for_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<CompletedDownload>> {
        sqlx::query_as::<_, CompletedDownload>(
            r#"
            SELECT d.id, d.item_id, i.title, d.file_path, d.file_size, i.pub_date
            FROM downloads d
            JOIN items i ON i.id = d.item_id
            WHERE i.subscription_id = ? AND d.status = ?
            ORDER BY i.pub_date IS NULL ASC, i.pub_date DESC, i.id DESC
            "#,
        )
        .bind(subscription_id)
        .bind(Status::Completed)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list completed downloads", e))
    }

    /// Return downloads interrupted by a crash to `pending`
    ///
    /// Their partial files stay on disk and are resumed by the next queue run.
    pub async fn reset_interrupted_downloads(&self) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query("UPDATE downloads SET status = ?, updated_at = ? WHERE status = ?")
            .bind(Status::Pending)
            .bind(now)
            .bind(Status::Downloading)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("reset interrupted downloads", e))?;

        Ok(result.rows_affected())
    }
}
