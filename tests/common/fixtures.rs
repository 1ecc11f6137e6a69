//! Feed, oracle and config fixtures for integration tests

use async_trait::async_trait;
use podcast_dl::{
    Config, ConsumptionOracle, Error, FeedSnapshot, FeedSource, ItemMetadata, Result,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

/// Feed source serving snapshots registered per URL
#[derive(Default)]
pub struct MemoryFeeds {
    feeds: Mutex<HashMap<String, FeedSnapshot>>,
}

impl MemoryFeeds {
    pub fn set(&self, url: &str, snapshot: FeedSnapshot) {
        self.feeds.lock().unwrap().insert(url.to_string(), snapshot);
    }
}

#[async_trait]
impl FeedSource for MemoryFeeds {
    async fn fetch(&self, feed_url: &str) -> Result<FeedSnapshot> {
        self.feeds
            .lock()
            .unwrap()
            .get(feed_url)
            .cloned()
            .ok_or_else(|| Error::Feed(format!("unreachable feed {feed_url}")))
    }
}

/// Oracle that reports the listed file names as played
#[derive(Default)]
pub struct PlayedFiles {
    played: Mutex<HashSet<String>>,
}

impl PlayedFiles {
    pub fn mark_played(&self, file_name: &str) {
        self.played.lock().unwrap().insert(file_name.to_string());
    }
}

#[async_trait]
impl ConsumptionOracle for PlayedFiles {
    async fn is_consumed(&self, path: &Path) -> Result<bool> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        Ok(self.played.lock().unwrap().contains(name))
    }
}

/// Config rooted in a fresh temp dir
pub fn test_config() -> (Config, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("podcast-dl.db");
    config.download.download_dir = temp_dir.path().join("library");
    config.download.max_concurrent_downloads = 2;
    (config, temp_dir)
}

/// Feed entry published on `day` of January 2024, served from `base`
pub fn episode(base: &str, guid: &str, day: u32) -> ItemMetadata {
    let pub_date = chrono::NaiveDate::from_ymd_opt(2024, 1, day)
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .map(|dt| dt.and_utc().timestamp());
    ItemMetadata {
        guid: guid.to_string(),
        title: format!("Episode {guid}"),
        pub_date,
        media_url: format!("{base}/media/{guid}.mp3"),
        file_size: None,
        mime_type: Some("audio/mpeg".to_string()),
        episode_number: None,
        season_number: None,
    }
}

/// Deterministic media body
pub fn media_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 241) as u8).collect()
}
