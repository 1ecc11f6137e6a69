//! Subscription management and item discovery.

use std::collections::HashSet;

use crate::db::{NewSubscription, Subscription};
use crate::discovery::{FeedSnapshot, select_new_items};
use crate::error::{DatabaseError, DownloadError, Error, Result};
use crate::types::{RefreshReport, SubscriptionId};
use crate::utils::sanitize_folder_name;

use super::PodcastDownloader;

/// Upper bound for `max_items_to_keep`
pub const MAX_ITEMS_TO_KEEP: i64 = 100;

/// Clamp a retention floor into `1..=MAX_ITEMS_TO_KEEP`
pub fn clamp_items_to_keep(requested: i64) -> i64 {
    requested.clamp(1, MAX_ITEMS_TO_KEEP)
}

impl PodcastDownloader {
    /// Subscribe to a feed
    ///
    /// Idempotent on the feed URL: an existing subscription is returned as-is.
    /// Otherwise the feed is fetched, the storage folder is derived from its
    /// title (once, never renamed), and the newest `max_items_to_keep` items
    /// are stored. Items are not queued here; the next refresh does that when
    /// `auto_download` is set.
    pub async fn add_subscription(
        &self,
        feed_url: &str,
        max_items_to_keep: Option<i64>,
        auto_download: bool,
    ) -> Result<Subscription> {
        if let Some(existing) = self.db.get_subscription_by_url(feed_url).await? {
            tracing::info!(subscription_id = existing.id.0, title = %existing.title, "Subscription already exists");
            return Ok(existing);
        }

        let snapshot = self.feed_source()?.fetch(feed_url).await?;
        let max_items_to_keep = clamp_items_to_keep(
            max_items_to_keep.unwrap_or(i64::from(self.config.retention.default_max_items_to_keep)),
        );

        let new_subscription = NewSubscription {
            title: snapshot.title.clone(),
            feed_url: feed_url.to_string(),
            folder_name: sanitize_folder_name(&snapshot.title),
            max_items_to_keep,
            auto_download,
        };

        let id = match self.db.insert_subscription(&new_subscription).await {
            Ok(id) => id,
            Err(Error::Database(DatabaseError::ConstraintViolation(_))) => {
                return self.require_subscription_by_url(feed_url).await;
            }
            Err(e) => return Err(e),
        };
        self.db.touch_subscription(id, &snapshot.title).await?;

        let subscription = self.require_subscription(id).await?;
        self.files.folder_for(&subscription).await?;

        let added = self.store_new_items(&subscription, &snapshot).await?;
        tracing::info!(
            subscription_id = id.0,
            title = %subscription.title,
            folder = %subscription.folder_name,
            items = added,
            "Added subscription"
        );

        Ok(subscription)
    }

    /// Fetch a subscription's feed, store unseen items and auto-queue
    ///
    /// The title and last-checked time are refreshed; the folder name is not.
    /// With `auto_download`, the newest `max_items_to_keep` items lacking a
    /// pending, downloading or completed download are enqueued. Items that
    /// don't fit on disk are skipped without failing the refresh.
    pub async fn refresh_subscription(&self, id: SubscriptionId) -> Result<RefreshReport> {
        let subscription = self.require_subscription(id).await?;
        let snapshot = self.feed_source()?.fetch(&subscription.feed_url).await?;

        self.db.touch_subscription(id, &snapshot.title).await?;
        let new_items = self.store_new_items(&subscription, &snapshot).await?;

        let queued = if subscription.auto_download {
            self.queue_recent_items(&subscription).await?
        } else {
            0
        };

        tracing::info!(
            subscription_id = id.0,
            title = %snapshot.title,
            new_items,
            queued,
            "Refreshed subscription"
        );

        Ok(RefreshReport {
            refreshed: 1,
            failed: 0,
            new_items,
            queued,
        })
    }

    /// Refresh every subscription; one failure never stops the others
    pub async fn refresh_all(&self) -> Result<RefreshReport> {
        let subscriptions = self.db.list_subscriptions().await?;
        let mut report = RefreshReport::default();

        for subscription in subscriptions {
            match self.refresh_subscription(subscription.id).await {
                Ok(one) => {
                    report.refreshed += 1;
                    report.new_items += one.new_items;
                    report.queued += one.queued;
                }
                Err(e) => {
                    tracing::error!(
                        subscription_id = subscription.id.0,
                        title = %subscription.title,
                        error = %e,
                        "Failed to refresh subscription"
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            refreshed = report.refreshed,
            failed = report.failed,
            new_items = report.new_items,
            queued = report.queued,
            "Feed refresh complete"
        );
        Ok(report)
    }

    /// Change a subscription's retention floor and/or auto-download flag
    ///
    /// The retention floor is clamped into `1..=100`.
    pub async fn update_subscription(
        &self,
        id: SubscriptionId,
        max_items_to_keep: Option<i64>,
        auto_download: Option<bool>,
    ) -> Result<Subscription> {
        let updated = self
            .db
            .update_subscription_settings(id, max_items_to_keep.map(clamp_items_to_keep), auto_download)
            .await?;
        if !updated {
            return Err(Error::NotFound(format!("subscription {}", id)));
        }
        self.require_subscription(id).await
    }

    /// Delete a subscription with its items and downloads
    ///
    /// With `delete_files`, the subscription folder is removed best-effort.
    pub async fn delete_subscription(&self, id: SubscriptionId, delete_files: bool) -> Result<bool> {
        let subscription = self.require_subscription(id).await?;

        if !self.db.delete_subscription(id).await? {
            return Ok(false);
        }

        if delete_files {
            self.files.remove_folder(&subscription.folder_name).await;
        }

        tracing::info!(subscription_id = id.0, title = %subscription.title, delete_files, "Deleted subscription");
        Ok(true)
    }

    async fn store_new_items(&self, subscription: &Subscription, snapshot: &FeedSnapshot) -> Result<usize> {
        let known: HashSet<String> = self
            .db
            .list_item_guids(subscription.id)
            .await?
            .into_iter()
            .collect();

        let limit = usize::try_from(subscription.max_items_to_keep).unwrap_or(1);
        let fresh: Vec<_> = select_new_items(snapshot, &known, limit)
            .into_iter()
            .map(|meta| meta.into_new_item(subscription.id))
            .collect();

        if fresh.is_empty() {
            tracing::debug!(subscription_id = subscription.id.0, "No new items");
            return Ok(0);
        }

        let inserted = self.db.insert_items(&fresh).await?;
        Ok(inserted.len())
    }

    async fn queue_recent_items(&self, subscription: &Subscription) -> Result<usize> {
        let candidates = self
            .db
            .list_items_needing_download(subscription.id, subscription.max_items_to_keep)
            .await?;

        let mut queued = 0usize;
        for item in candidates {
            match self.enqueue(item.id).await {
                Ok(_) => queued += 1,
                Err(e @ Error::InsufficientSpace { .. }) => {
                    tracing::warn!(item_id = item.id.0, title = %item.title, error = %e, "Skipping item");
                }
                Err(e @ Error::Download(DownloadError::ItemNotFound { .. })) => {
                    tracing::error!(item_id = item.id.0, error = %e, "Item vanished before queueing");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(queued)
    }

    async fn require_subscription(&self, id: SubscriptionId) -> Result<Subscription> {
        self.db
            .get_subscription(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subscription {}", id)))
    }

    async fn require_subscription_by_url(&self, feed_url: &str) -> Result<Subscription> {
        self.db
            .get_subscription_by_url(feed_url)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subscription for {}", feed_url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_to_keep_is_clamped() {
        assert_eq!(clamp_items_to_keep(0), 1);
        assert_eq!(clamp_items_to_keep(-5), 1);
        assert_eq!(clamp_items_to_keep(7), 7);
        assert_eq!(clamp_items_to_keep(1000), MAX_ITEMS_TO_KEEP);
    }
}
