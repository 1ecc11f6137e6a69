use crate::db::*;
use crate::types::SubscriptionId;
use tempfile::NamedTempFile;


/// Open a fresh database backed by a temporary file
async fn open_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

async fn seed_subscription(db: &Database, feed_url: &str) -> SubscriptionId {
    db.insert_subscription(&NewSubscription {
        title: "Test Show".to_string(),
        feed_url: feed_url.to_string(),
        folder_name: "Test-Show".to_string(),
        max_items_to_keep: 2,
        auto_download: true,
    })
    .await
    .unwrap()
}

fn new_item(subscription_id: SubscriptionId, guid: &str, pub_date: Option<i64>) -> NewItem {
    NewItem {
        subscription_id,
        guid: guid.to_string(),
        title: format!("Episode {guid}"),
        pub_date,
        media_url: format!("https://cdn.example.com/{guid}.mp3"),
        file_size: Some(1_000_000),
        mime_type: Some("audio/mpeg".to_string()),
        episode_number: None,
        season_number: None,
    }
}
