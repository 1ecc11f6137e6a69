//! Feed discovery seam
//!
//! Feed parsing lives outside this crate. A [`FeedSource`] turns a feed URL
//! into a [`FeedSnapshot`]; the downloader decides which of its items are new
//! and stores them.

use crate::db::NewItem;
use crate::error::Result;
use crate::types::SubscriptionId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Metadata for one media entry as published in a feed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Globally unique identifier
    pub guid: String,
    /// Entry title
    pub title: String,
    /// Publication time as a unix timestamp
    pub pub_date: Option<i64>,
    /// Media enclosure URL
    pub media_url: String,
    /// Declared enclosure size in bytes
    pub file_size: Option<i64>,
    /// Declared enclosure MIME type
    pub mime_type: Option<String>,
    /// Episode number
    pub episode_number: Option<i64>,
    /// Season number
    pub season_number: Option<i64>,
}

impl ItemMetadata {
    /// Build the insertable record for a subscription
    pub(crate) fn into_new_item(self, subscription_id: SubscriptionId) -> NewItem {
        NewItem {
            subscription_id,
            guid: self.guid,
            title: self.title,
            pub_date: self.pub_date,
            media_url: self.media_url,
            file_size: self.file_size.filter(|size| *size > 0),
            mime_type: self.mime_type,
            episode_number: self.episode_number,
            season_number: self.season_number,
        }
    }
}

/// A fetched feed: its title and entries in any order
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    /// Feed title
    pub title: String,
    /// Entries with media enclosures
    pub items: Vec<ItemMetadata>,
}

/// Source of feed snapshots
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch and parse the feed at `feed_url`
    async fn fetch(&self, feed_url: &str) -> Result<FeedSnapshot>;
}

/// Pick the entries worth storing: unseen guids, newest first, at most `limit`
///
/// Undated entries sort after dated ones.
pub fn select_new_items(
    snapshot: &FeedSnapshot,
    known_guids: &std::collections::HashSet<String>,
    limit: usize,
) -> Vec<ItemMetadata> {
    let mut fresh: Vec<ItemMetadata> = snapshot
        .items
        .iter()
        .filter(|item| !known_guids.contains(&item.guid))
        .cloned()
        .collect();

    fresh.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
    fresh.truncate(limit);
    fresh
}
