//! Subscription CRUD operations.

use crate::error::DatabaseError;
use crate::types::SubscriptionId;
use crate::{Error, Result};

use super::{Database, NewSubscription, Subscription, is_unique_violation};

const SUBSCRIPTION_COLUMNS: &str = "id, title, feed_url, folder_name, max_items_to_keep, \
     auto_download, last_checked, created_at";

impl Database {
    /// Insert a new subscription
    ///
    /// Fails with [`DatabaseError::ConstraintViolation`] when the feed URL is
    /// already tracked.
    pub async fn insert_subscription(&self, sub: &NewSubscription) -> Result<SubscriptionId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (
                title, feed_url, folder_name, max_items_to_keep, auto_download,
                last_checked, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sub.title)
        .bind(&sub.feed_url)
        .bind(&sub.folder_name)
        .bind(sub.max_items_to_keep)
        .bind(sub.auto_download)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::Database(DatabaseError::ConstraintViolation(format!(
                    "subscription already exists for {}",
                    sub.feed_url
                )))
            } else {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert subscription: {}",
                    e
                )))
            }
        })?;

        Ok(SubscriptionId(result.last_insert_rowid()))
    }

    /// Get a subscription by ID
    pub async fn get_subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get subscription: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Get a subscription by its feed URL
    pub async fn get_subscription_by_url(&self, feed_url: &str) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE feed_url = ?"
        ))
        .bind(feed_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get subscription by URL: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all subscriptions in creation order
    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list subscriptions: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Record a successful refresh
    ///
    /// Only the title and last-checked timestamp change; the folder name is fixed
    /// at creation so existing files are never orphaned.
    pub async fn touch_subscription(&self, id: SubscriptionId, title: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query("UPDATE subscriptions SET title = ?, last_checked = ? WHERE id = ?")
            .bind(title)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update subscription: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Update retention and auto-download settings
    pub async fn update_subscription_settings(
        &self,
        id: SubscriptionId,
        max_items_to_keep: Option<i64>,
        auto_download: Option<bool>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET max_items_to_keep = COALESCE(?, max_items_to_keep),
                auto_download = COALESCE(?, auto_download)
            WHERE id = ?
            "#,
        )
        .bind(max_items_to_keep)
        .bind(auto_download)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update subscription settings: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a subscription; its items and downloads cascade
    pub async fn delete_subscription(&self, id: SubscriptionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete subscription: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }
}
