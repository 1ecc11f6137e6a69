//! Filesystem planning for downloaded media
//!
//! [`FileManager`] owns the download root. It computes deterministic relative
//! paths (`{folder}/{YYYY-MM-DD}-{slug}.{ext}`), resolves them back to absolute
//! paths without letting them escape the root, and performs best-effort
//! deletion and storage accounting.

use crate::db::{Item, Subscription};
use crate::error::{DownloadError, Error, Result};
use crate::types::ItemId;
use crate::utils;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Maximum length of the title part of a filename, in characters (also
/// capped at [`utils::MAX_SLUG_BYTES`] bytes)
pub const MAX_TITLE_LEN: usize = 150;

/// Source of free-space figures for the download filesystem
pub trait SpaceProbe: Send + Sync {
    /// Bytes available to this process on the filesystem holding `path`
    fn available_space(&self, path: &Path) -> std::io::Result<u64>;
}

/// [`SpaceProbe`] backed by the operating system (statvfs / GetDiskFreeSpaceExW)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpaceProbe;

impl SpaceProbe for SystemSpaceProbe {
    fn available_space(&self, path: &Path) -> std::io::Result<u64> {
        utils::get_available_space(path)
    }
}

/// Path planner and storage accountant rooted at the download directory
#[derive(Clone)]
pub struct FileManager {
    root: PathBuf,
    probe: Arc<dyn SpaceProbe>,
}

impl std::fmt::Debug for FileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileManager")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl FileManager {
    /// Create a file manager, creating the root directory if needed
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_probe(root, Arc::new(SystemSpaceProbe)).await
    }

    /// Create a file manager with a custom free-space source
    pub async fn with_probe(root: impl Into<PathBuf>, probe: Arc<dyn SpaceProbe>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        tracing::debug!(root = %root.display(), "File manager initialized");
        Ok(Self { root, probe })
    }

    /// Download root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute directory for a subscription, created if absent
    ///
    /// The folder name is the one stored on the subscription at creation.
    pub async fn folder_for(&self, subscription: &Subscription) -> Result<PathBuf> {
        let dir = self.resolve(&subscription.folder_name)?;
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Relative destination path for an item, creating its folder
    pub async fn path_for(&self, item: &Item, subscription: &Subscription) -> Result<String> {
        self.folder_for(subscription).await?;
        Ok(format!(
            "{}/{}",
            subscription.folder_name,
            Self::file_name_for(item)
        ))
    }

    /// `{YYYY-MM-DD}-{slug}.{ext}` using the publish date, or today when undated
    pub fn file_name_for(item: &Item) -> String {
        let date = item
            .pub_date
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(chrono::Utc::now)
            .format("%Y-%m-%d");
        let title = utils::slugify(&item.title, MAX_TITLE_LEN);
        let ext = utils::extension_for(&item.media_url, item.mime_type.as_deref());
        format!("{}-{}.{}", date, title, ext)
    }

    /// Alternate form of a planned path for when it is already taken
    ///
    /// Attempt 0 is the planned path itself; attempt 1 inserts `-{item_id}`
    /// before the extension and later attempts add a counter after that. The
    /// result depends only on its inputs.
    pub fn disambiguate(planned: &str, item_id: ItemId, attempt: u32) -> String {
        if attempt == 0 {
            return planned.to_string();
        }
        let suffix = match attempt {
            1 => format!("-{}", item_id),
            n => format!("-{}-{}", item_id, n),
        };
        let name_start = planned.rfind('/').map_or(0, |i| i + 1);
        match planned[name_start..].rfind('.') {
            Some(dot) => {
                let dot = name_start + dot;
                format!("{}{}{}", &planned[..dot], suffix, &planned[dot..])
            }
            None => format!("{}{}", planned, suffix),
        }
    }

    /// Whether something already exists at a relative path
    pub async fn is_occupied(&self, relative: &str) -> Result<bool> {
        let full = self.resolve(relative)?;
        Ok(tokio::fs::try_exists(&full).await?)
    }

    /// Resolve a relative path to an absolute one strictly inside the root
    ///
    /// Rejects absolute paths, `..` components, paths naming the root itself,
    /// and existing paths whose canonical form (after symlinks) leaves the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let invalid = || {
            Error::Download(DownloadError::InvalidPath {
                path: PathBuf::from(relative),
            })
        };

        let rel = Path::new(relative);
        let mut depth = 0usize;
        for component in rel.components() {
            match component {
                Component::Normal(_) => depth += 1,
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid());
                }
            }
        }
        if depth == 0 {
            return Err(invalid());
        }

        let full = self.root.join(rel);

        if let (Ok(canonical), Ok(root)) = (full.canonicalize(), self.root.canonicalize())
            && (!canonical.starts_with(&root) || canonical == root)
        {
            return Err(invalid());
        }

        Ok(full)
    }

    /// Free bytes on the filesystem holding the root
    pub fn available_space(&self) -> Result<u64> {
        self.probe
            .available_space(&self.root)
            .map_err(|e| Error::DiskSpaceCheckFailed(e.to_string()))
    }

    /// Size of a regular file, or None if it doesn't exist
    pub async fn file_size(&self, path: &Path) -> Option<u64> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Some(meta.len()),
            _ => None,
        }
    }

    /// Delete a file, best-effort
    ///
    /// Returns true if a file was removed. Failures are logged, never raised.
    pub async fn delete_file(&self, path: &Path) -> bool {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Deleted file");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to delete file");
                false
            }
        }
    }

    /// Remove subscription folders under the root that have no entries
    ///
    /// Best-effort; returns the number of directories removed.
    pub async fn cleanup_empty_directories(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(root = %self.root.display(), error = %e, "Directory cleanup failed");
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Directory cleanup failed while listing");
                    break;
                }
            };
            let path = entry.path();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir || !Self::is_empty_dir(&path).await {
                continue;
            }
            // remove_dir refuses non-empty directories, so a file landing in
            // the meantime is never lost
            match tokio::fs::remove_dir(&path).await {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "Removed empty directory");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove directory");
                }
            }
        }

        removed
    }

    /// Remove a subscription folder and everything in it, best-effort
    pub async fn remove_folder(&self, folder_name: &str) -> bool {
        let dir = match self.resolve(folder_name) {
            Ok(dir) => dir,
            Err(e) => {
                tracing::error!(folder = folder_name, error = %e, "Refusing to remove folder");
                return false;
            }
        };
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::info!(path = %dir.display(), "Removed subscription folder");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::error!(path = %dir.display(), error = %e, "Failed to remove folder");
                false
            }
        }
    }

    /// Total bytes of all files under a subscription folder
    pub async fn subscription_storage_size(&self, folder_name: &str) -> u64 {
        let Ok(dir) = self.resolve(folder_name) else {
            return 0;
        };

        let mut total = 0u64;
        let mut stack = vec![dir];
        while let Some(dir) = stack.pop() {
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                match entry.metadata().await {
                    Ok(meta) if meta.is_dir() => stack.push(entry.path()),
                    Ok(meta) => total += meta.len(),
                    Err(e) => {
                        tracing::warn!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
                    }
                }
            }
        }
        total
    }

    async fn is_empty_dir(path: &Path) -> bool {
        match tokio::fs::read_dir(path).await {
            Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
            Err(_) => false,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemId, SubscriptionId};
    use tempfile::TempDir;

    struct FixedSpace(u64);

    impl SpaceProbe for FixedSpace {
        fn available_space(&self, _path: &Path) -> std::io::Result<u64> {
            Ok(self.0)
        }
    }

    fn subscription(folder: &str) -> Subscription {
        Subscription {
            id: SubscriptionId(1),
            title: "Show".into(),
            feed_url: "https://example.com/feed.xml".into(),
            folder_name: folder.into(),
            max_items_to_keep: 3,
            auto_download: true,
            last_checked: None,
            created_at: 0,
        }
    }

    fn item(title: &str, pub_date: Option<i64>, url: &str, mime: Option<&str>) -> Item {
        Item {
            id: ItemId(1),
            subscription_id: SubscriptionId(1),
            guid: "g".into(),
            title: title.into(),
            pub_date,
            media_url: url.into(),
            file_size: None,
            mime_type: mime.map(str::to_string),
            episode_number: None,
            season_number: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_path_for_uses_date_slug_and_extension() {
        let temp = TempDir::new().unwrap();
        let fm = FileManager::new(temp.path()).await.unwrap();
        // 2024-03-15T12:00:00Z
        let it = item(
            "Episode 12: Rust & Friends",
            Some(1_710_504_000),
            "https://cdn.example.com/audio/ep12.m4a",
            Some("audio/mpeg"),
        );

        let path = fm.path_for(&it, &subscription("My-Show")).await.unwrap();

        assert_eq!(path, "My-Show/2024-03-15-episode-12-rust-friends.m4a");
        assert!(temp.path().join("My-Show").is_dir());
    }

    #[tokio::test]
    async fn test_undated_item_uses_today() {
        let it = item("Bonus", None, "https://cdn.example.com/stream", None);
        let name = FileManager::file_name_for(&it);
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        assert_eq!(name, format!("{today}-bonus.mp3"));
    }

    #[test]
    fn test_title_is_truncated() {
        let long_title = "word ".repeat(100);
        let it = item(&long_title, Some(0), "https://x.example/a.mp3", None);
        let name = FileManager::file_name_for(&it);
        let slug = name
            .strip_prefix("1970-01-01-")
            .unwrap()
            .strip_suffix(".mp3")
            .unwrap();
        assert!(slug.chars().count() <= MAX_TITLE_LEN);
        assert!(!slug.ends_with('-'));
    }

    #[tokio::test]
    async fn test_long_non_latin_title_can_be_created() {
        let temp = TempDir::new().unwrap();
        let fm = FileManager::new(temp.path()).await.unwrap();
        let it = item(
            &"ポッドキャスト".repeat(25),
            Some(1_710_504_000),
            "https://cdn.example.com/audio/ep.mp3",
            None,
        );

        let path = fm.path_for(&it, &subscription("Show")).await.unwrap();
        let longest = FileManager::disambiguate(&path, ItemId(i64::MAX), 99);
        let full = fm.resolve(&longest).unwrap();
        assert!(full.file_name().unwrap().len() <= 255);
        std::fs::write(&full, b"ok").unwrap();
        assert!(fm.is_occupied(&longest).await.unwrap());
    }

    #[test]
    fn test_disambiguate_inserts_item_id_before_extension() {
        let planned = "Show/2024-01-02-episode-a.mp3";
        assert_eq!(FileManager::disambiguate(planned, ItemId(7), 0), planned);
        assert_eq!(
            FileManager::disambiguate(planned, ItemId(7), 1),
            "Show/2024-01-02-episode-a-7.mp3"
        );
        assert_eq!(
            FileManager::disambiguate(planned, ItemId(7), 3),
            "Show/2024-01-02-episode-a-7-3.mp3"
        );
        assert_eq!(
            FileManager::disambiguate("My.Show/2024-01-02-x", ItemId(7), 1),
            "My.Show/2024-01-02-x-7"
        );
    }

    #[tokio::test]
    async fn test_resolve_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let fm = FileManager::new(temp.path().join("root")).await.unwrap();

        assert!(fm.resolve("../escape.mp3").is_err());
        assert!(fm.resolve("show/../../escape.mp3").is_err());
        assert!(fm.resolve("/etc/passwd").is_err());
        assert!(fm.resolve("").is_err());
        assert!(fm.resolve(".").is_err());

        let ok = fm.resolve("show/ep.mp3").unwrap();
        assert_eq!(ok, temp.path().join("root").join("show/ep.mp3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_rejects_symlink_escape() {
        let temp = TempDir::new().unwrap();
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        let fm = FileManager::new(temp.path().join("root")).await.unwrap();
        std::os::unix::fs::symlink(&outside, temp.path().join("root").join("link")).unwrap();

        assert!(fm.resolve("link").is_err());
    }

    #[tokio::test]
    async fn test_available_space_uses_probe() {
        let temp = TempDir::new().unwrap();
        let fm = FileManager::with_probe(temp.path(), Arc::new(FixedSpace(42)))
            .await
            .unwrap();
        assert_eq!(fm.available_space().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_delete_file_is_best_effort() {
        let temp = TempDir::new().unwrap();
        let fm = FileManager::new(temp.path()).await.unwrap();
        let file = temp.path().join("a.mp3");
        std::fs::write(&file, b"abc").unwrap();

        assert!(fm.delete_file(&file).await);
        assert!(!file.exists());
        // Missing file: no error, just false
        assert!(!fm.delete_file(&file).await);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_empty_directories() {
        let temp = TempDir::new().unwrap();
        let fm = FileManager::new(temp.path()).await.unwrap();
        std::fs::create_dir_all(temp.path().join("empty")).unwrap();
        std::fs::create_dir_all(temp.path().join("full")).unwrap();
        std::fs::write(temp.path().join("full/ep.mp3"), b"x").unwrap();

        assert_eq!(fm.cleanup_empty_directories().await, 1);
        assert!(!temp.path().join("empty").exists());
        assert!(temp.path().join("full/ep.mp3").exists());
    }

    #[tokio::test]
    async fn test_storage_size_sums_nested_files() {
        let temp = TempDir::new().unwrap();
        let fm = FileManager::new(temp.path()).await.unwrap();
        std::fs::create_dir_all(temp.path().join("show/extra")).unwrap();
        std::fs::write(temp.path().join("show/a.mp3"), vec![0u8; 100]).unwrap();
        std::fs::write(temp.path().join("show/extra/b.mp3"), vec![0u8; 50]).unwrap();

        assert_eq!(fm.subscription_storage_size("show").await, 150);
        assert_eq!(fm.subscription_storage_size("missing").await, 0);
    }

    #[tokio::test]
    async fn test_remove_folder() {
        let temp = TempDir::new().unwrap();
        let fm = FileManager::new(temp.path()).await.unwrap();
        std::fs::create_dir_all(temp.path().join("show")).unwrap();
        std::fs::write(temp.path().join("show/a.mp3"), b"x").unwrap();

        assert!(fm.remove_folder("show").await);
        assert!(!temp.path().join("show").exists());
        assert!(!fm.remove_folder("../").await);
    }
}
