use super::*;
use crate::config::GIB;
use crate::types::{DiskSpaceLevel, Status};

#[tokio::test]
async fn test_disk_check_levels_and_events() {
    let (downloader, space, _temp_dir) = create_test_downloader_with(|_| {}).await;
    let mut events = downloader.subscribe();

    assert_eq!(downloader.check_disk_space().await.unwrap(), DiskSpaceLevel::Ok);
    assert!(events.try_recv().is_err());

    space.set(7 * GIB);
    assert_eq!(downloader.check_disk_space().await.unwrap(), DiskSpaceLevel::Info);

    space.set(2 * GIB);
    assert_eq!(downloader.check_disk_space().await.unwrap(), DiskSpaceLevel::Warning);

    space.set(GIB / 2);
    assert_eq!(downloader.check_disk_space().await.unwrap(), DiskSpaceLevel::Critical);

    let levels: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|event| match event {
            Event::DiskSpaceLow { level, .. } => Some(level),
            _ => None,
        })
        .collect();
    assert_eq!(
        levels,
        vec![
            DiskSpaceLevel::Info,
            DiskSpaceLevel::Warning,
            DiskSpaceLevel::Critical
        ]
    );
}

#[tokio::test]
async fn test_retention_disabled_does_nothing() {
    let (downloader, _space, _temp_dir) = create_test_downloader_with(|config| {
        config.retention.enabled = false;
    })
    .await;
    let mut events = downloader.subscribe();

    let report = downloader.run_retention().await.unwrap();
    assert_eq!(report, crate::types::RetentionReport::default());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_retention_trims_beyond_floor_and_emits_report() {
    let (downloader, _temp_dir) = create_test_downloader().await;

    // The test subscription keeps 2; complete 3 downloads of distinct dates
    let sub = test_subscription(&downloader).await;
    let mut ids = Vec::new();
    for (guid, date) in [("new", 300), ("mid", 200), ("old", 100)] {
        let items = downloader
            .db
            .insert_items(&[crate::db::NewItem {
                subscription_id: sub,
                guid: guid.to_string(),
                title: guid.to_string(),
                pub_date: Some(date),
                media_url: format!("https://cdn.example.com/{guid}.mp3"),
                file_size: None,
                mime_type: None,
                episode_number: None,
                season_number: None,
            }])
            .await
            .unwrap();
        let download = downloader.enqueue(items[0]).await.unwrap();
        assert!(downloader.db.claim_download(download.id).await.unwrap());
        assert!(downloader.db.mark_download_completed(download.id, 3).await.unwrap());
        let file = downloader.files().resolve(&download.file_path).unwrap();
        std::fs::write(file, b"abc").unwrap();
        ids.push(download.id);
    }

    let mut events = downloader.subscribe();
    let report = downloader.run_retention().await.unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.freed_bytes, 3);

    assert!(downloader.get_download(ids[2]).await.unwrap().is_none());
    for id in &ids[..2] {
        let record = downloader.get_download(*id).await.unwrap().unwrap();
        assert_eq!(record.status, Status::Completed);
    }

    match events.try_recv().unwrap() {
        Event::RetentionSweep { report: emitted } => assert_eq!(emitted, report),
        other => panic!("expected RetentionSweep, got {other:?}"),
    }
}
