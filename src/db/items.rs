//! Item insertion and lookups.

use crate::error::DatabaseError;
use crate::types::{ItemId, SubscriptionId};
use crate::{Error, Result};

use super::{Database, Item, NewItem, is_unique_violation};

const ITEM_COLUMNS: &str = "id, subscription_id, guid, title, pub_date, media_url, file_size, \
     mime_type, episode_number, season_number, created_at";

impl Database {
    /// Insert a batch of items, skipping guids that already exist
    ///
    /// Each item is inserted in its own transaction: a unique-constraint
    /// violation rolls back that item only and the batch continues. Any other
    /// error aborts the batch. Returns the IDs of the inserted items.
    pub async fn insert_items(&self, items: &[NewItem]) -> Result<Vec<ItemId>> {
        let now = chrono::Utc::now().timestamp();
        let mut inserted = Vec::with_capacity(items.len());

        for item in items {
            let mut tx = self.pool.begin().await.map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

            let result = sqlx::query(
                r#"
                INSERT INTO items (
                    subscription_id, guid, title, pub_date, media_url, file_size,
                    mime_type, episode_number, season_number, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(item.subscription_id)
            .bind(&item.guid)
            .bind(&item.title)
            .bind(item.pub_date)
            .bind(&item.media_url)
            .bind(item.file_size)
            .bind(&item.mime_type)
            .bind(item.episode_number)
            .bind(item.season_number)
            .bind(now)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(done) => {
                    tx.commit().await.map_err(|e| {
                        Error::Database(DatabaseError::QueryFailed(format!(
                            "Failed to commit item insert: {}",
                            e
                        )))
                    })?;
                    inserted.push(ItemId(done.last_insert_rowid()));
                }
                Err(e) if is_unique_violation(&e) => {
                    let _ = tx.rollback().await;
                    tracing::warn!(guid = %item.guid, title = %item.title, "Skipping duplicate item");
                }
                Err(e) => {
                    let _ = tx.rollback().await;
                    return Err(Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to insert item {}: {}",
                        item.guid, e
                    ))));
                }
            }
        }

        Ok(inserted)
    }

    /// Get an item by ID
    pub async fn get_item(&self, id: ItemId) -> Result<Option<Item>> {
        let row = sqlx::query_as::<_, Item>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get item: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Guids already stored for a subscription
    pub async fn list_item_guids(&self, subscription_id: SubscriptionId) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>("SELECT guid FROM items WHERE subscription_id = ?")
            .bind(subscription_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list item guids: {}",
                    e
                )))
            })?;

        Ok(rows)
    }

    /// List a subscription's items, newest first
    ///
    /// Items without a publish date sort last. `limit` of `None` returns all.
    pub async fn list_items(
        &self,
        subscription_id: SubscriptionId,
        limit: Option<i64>,
    ) -> Result<Vec<Item>> {
        let rows = sqlx::query_as::<_, Item>(&format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM items
            WHERE subscription_id = ?
            ORDER BY pub_date IS NULL ASC, pub_date DESC, id DESC
            LIMIT ?
            "#
        ))
        .bind(subscription_id)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list items: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Newest `limit` items of a subscription that have no active or completed download
    ///
    /// Items whose download is `failed` or `deleted` (or that have none) are
    /// returned; `pending`, `downloading` and `completed` ones are not.
    pub async fn list_items_needing_download(
        &self,
        subscription_id: SubscriptionId,
        limit: i64,
    ) -> Result<Vec<Item>> {
        let rows = sqlx::query_as::<_, Item>(
            r#"
            SELECT i.id, i.subscription_id, i.guid, i.title, i.pub_date, i.media_url,
                   i.file_size, i.mime_type, i.episode_number, i.season_number, i.created_at
            FROM (
                SELECT * FROM items
                WHERE subscription_id = ?
                ORDER BY pub_date IS NULL ASC, pub_date DESC, id DESC
                LIMIT ?
            ) AS i
            LEFT JOIN downloads d ON d.item_id = i.id
            WHERE d.id IS NULL OR d.status IN ('failed', 'deleted')
            ORDER BY i.pub_date IS NULL ASC, i.pub_date DESC, i.id DESC
            "#,
        )
        .bind(subscription_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list items needing download: {}",
                e
            )))
        })?;

        Ok(rows)
    }
}
