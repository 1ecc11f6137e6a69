//! Shared test helpers for creating PodcastDownloader instances in tests.

use crate::config::{Config, GIB};
use crate::db::{Database, NewItem, NewSubscription};
use crate::discovery::{FeedSnapshot, FeedSource, ItemMetadata};
use crate::downloader::PodcastDownloader;
use crate::error::{Error, Result};
use crate::file_manager::{FileManager, SpaceProbe};
use crate::transfer::TransferExecutor;
use crate::types::{ItemId, SubscriptionId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::tempdir;

pub(crate) const TEST_FEED_URL: &str = "https://example.com/feed.xml";

/// Free-space probe reporting an adjustable fixed value
pub(crate) struct FakeSpace(AtomicU64);

impl FakeSpace {
    pub(crate) fn new(bytes: u64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(bytes)))
    }

    pub(crate) fn set(&self, bytes: u64) {
        self.0.store(bytes, Ordering::SeqCst);
    }
}

impl SpaceProbe for FakeSpace {
    fn available_space(&self, _path: &Path) -> std::io::Result<u64> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

/// Feed source serving snapshots registered per URL
#[derive(Default)]
pub(crate) struct StaticFeeds {
    feeds: Mutex<HashMap<String, FeedSnapshot>>,
}

impl StaticFeeds {
    pub(crate) fn set(&self, url: &str, snapshot: FeedSnapshot) {
        self.feeds.lock().unwrap().insert(url.to_string(), snapshot);
    }
}

#[async_trait]
impl FeedSource for StaticFeeds {
    async fn fetch(&self, feed_url: &str) -> Result<FeedSnapshot> {
        self.feeds
            .lock()
            .unwrap()
            .get(feed_url)
            .cloned()
            .ok_or_else(|| Error::Feed(format!("no such feed: {feed_url}")))
    }
}

/// Helper to create a test PodcastDownloader with a persistent database and
/// 1 TiB of reported free space.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader() -> (PodcastDownloader, tempfile::TempDir) {
    let (downloader, _space, temp_dir) = create_test_downloader_with(|_| {}).await;
    (downloader, temp_dir)
}

/// Like [`create_test_downloader`] with a config tweak and a handle on the
/// fake free-space probe
pub(crate) async fn create_test_downloader_with(
    configure: impl FnOnce(&mut Config),
) -> (PodcastDownloader, Arc<FakeSpace>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();

    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("test.db");
    config.download.download_dir = temp_dir.path().join("downloads");
    config.download.max_concurrent_downloads = 3;
    configure(&mut config);

    let space = FakeSpace::new(1024 * GIB);
    let db = Database::new(&config.persistence.database_path)
        .await
        .unwrap();
    let files = FileManager::with_probe(config.download.download_dir.clone(), space.clone())
        .await
        .unwrap();
    let transfer = TransferExecutor::new(config.download.clone()).unwrap();

    let downloader = PodcastDownloader::from_parts(config, db, files, transfer, None);
    (downloader, space, temp_dir)
}

/// Get or create the shared test subscription ("Test Show", keep 2)
pub(crate) async fn test_subscription(downloader: &PodcastDownloader) -> SubscriptionId {
    if let Some(sub) = downloader
        .db
        .get_subscription_by_url(TEST_FEED_URL)
        .await
        .unwrap()
    {
        return sub.id;
    }
    downloader
        .db
        .insert_subscription(&NewSubscription {
            title: "Test Show".to_string(),
            feed_url: TEST_FEED_URL.to_string(),
            folder_name: "Test-Show".to_string(),
            max_items_to_keep: 2,
            auto_download: true,
        })
        .await
        .unwrap()
}

/// Store an item of the test subscription titled "Episode {guid}"
pub(crate) async fn seed_item(
    downloader: &PodcastDownloader,
    guid: &str,
    media_url: &str,
    file_size: Option<i64>,
) -> ItemId {
    seed_titled_item(downloader, guid, &format!("Episode {guid}"), media_url, file_size).await
}

/// Store an item of the test subscription, published 2024-01-02
pub(crate) async fn seed_titled_item(
    downloader: &PodcastDownloader,
    guid: &str,
    title: &str,
    media_url: &str,
    file_size: Option<i64>,
) -> ItemId {
    let sub = test_subscription(downloader).await;
    let ids = downloader
        .db
        .insert_items(&[NewItem {
            subscription_id: sub,
            guid: guid.to_string(),
            title: title.to_string(),
            pub_date: Some(1_704_153_600), // 2024-01-02
            media_url: media_url.to_string(),
            file_size,
            mime_type: Some("audio/mpeg".to_string()),
            episode_number: None,
            season_number: None,
        }])
        .await
        .unwrap();
    ids[0]
}

/// Feed entry with a dated enclosure
pub(crate) fn feed_entry(guid: &str, pub_date: i64, media_url: &str) -> ItemMetadata {
    ItemMetadata {
        guid: guid.to_string(),
        title: format!("Episode {guid}"),
        pub_date: Some(pub_date),
        media_url: media_url.to_string(),
        file_size: None,
        mime_type: Some("audio/mpeg".to_string()),
        episode_number: None,
        season_number: None,
    }
}
