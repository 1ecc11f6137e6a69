//! Plex Media Server as a consumption oracle.
//!
//! The library section is looked up by name once and cached. A file is
//! matched by its stem against track titles, falling back to comparing the
//! file name of every media part in the section. Played means
//! `viewCount > 0`.
//!
//! Request paths are resolved relative to the configured URL, so a server
//! behind a reverse proxy at `https://host/plex` is queried under `/plex/`.

use super::ConsumptionOracle;
use crate::config::{PlexConfig, RetryConfig};
use crate::error::{DownloadError, Error, Result};
use crate::retry::with_retry;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::sync::OnceCell;
use url::Url;

const TOKEN_HEADER: &str = "X-Plex-Token";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    container: T,
}

#[derive(Debug, Default, Deserialize)]
struct SectionList {
    #[serde(rename = "Directory", default)]
    directories: Vec<Section>,
}

#[derive(Debug, Deserialize)]
struct Section {
    key: String,
    title: String,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataList {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<Metadata>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(rename = "viewCount", default)]
    view_count: u64,
    #[serde(rename = "Media", default)]
    media: Vec<Media>,
}

#[derive(Debug, Deserialize)]
struct Media {
    #[serde(rename = "Part", default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    file: String,
}

impl Metadata {
    fn played(&self) -> bool {
        self.view_count > 0
    }

    fn has_file_named(&self, name: &str) -> bool {
        self.media
            .iter()
            .flat_map(|m| m.parts.iter())
            .any(|part| {
                Path::new(&part.file)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n == name)
            })
    }
}

/// Consumption oracle backed by a Plex library section
pub struct PlexOracle {
    client: Client,
    base: Url,
    config: PlexConfig,
    retry: RetryConfig,
    section_key: OnceCell<String>,
}

impl PlexOracle {
    /// Create an oracle; no request is made until the first lookup
    pub fn new(config: PlexConfig, retry: RetryConfig) -> Result<Self> {
        let base = base_url(&config.url)?;
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base,
            config,
            retry,
            section_key: OnceCell::new(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| Error::Oracle(format!("invalid Plex request path {}: {}", path, e)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        with_retry(&self.retry, || {
            let url = url.clone();
            async move {
                let response = self
                    .client
                    .get(url)
                    .header(ACCEPT, "application/json")
                    .header(TOKEN_HEADER, &self.config.token)
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    return Err(Error::Download(DownloadError::HttpStatus {
                        status: status.as_u16(),
                        reason: status.canonical_reason().unwrap_or_default().to_string(),
                    }));
                }

                let body = response.json::<Envelope<T>>().await?;
                Ok(body.container)
            }
        })
        .await
    }

    async fn section_key(&self) -> Result<&str> {
        let key = self
            .section_key
            .get_or_try_init(|| async {
                let sections: SectionList = self.get_json("library/sections", &[]).await?;
                let found = sections
                    .directories
                    .into_iter()
                    .find(|s| s.title == self.config.library)
                    .ok_or_else(|| {
                        Error::Oracle(format!("Plex library '{}' not found", self.config.library))
                    })?;
                tracing::info!(library = %found.title, key = %found.key, "Found Plex library");
                Ok::<_, Error>(found.key)
            })
            .await?;
        Ok(key.as_str())
    }
}

/// Parse the configured server URL as a directory so relative joins keep its path
fn base_url(raw: &str) -> Result<Url> {
    let mut base = Url::parse(raw).map_err(|e| Error::Oracle(format!("invalid Plex URL: {}", e)))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

#[async_trait]
impl ConsumptionOracle for PlexOracle {
    async fn is_consumed(&self, path: &Path) -> Result<bool> {
        let (Some(stem), Some(name)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.file_name().and_then(|s| s.to_str()),
        ) else {
            return Err(Error::Oracle(format!("unusable path {}", path.display())));
        };

        let section = self.section_key().await?;
        let items_path = format!("library/sections/{}/all", section);

        let by_title: MetadataList = self.get_json(&items_path, &[("title", stem)]).await?;
        if let Some(item) = by_title.metadata.first() {
            tracing::debug!(file = name, view_count = item.view_count, "Matched Plex item by title");
            return Ok(item.played());
        }

        let everything: MetadataList = self.get_json(&items_path, &[]).await?;
        match everything.metadata.iter().find(|m| m.has_file_named(name)) {
            Some(item) => {
                tracing::debug!(file = name, view_count = item.view_count, "Matched Plex item by file");
                Ok(item.played())
            }
            None => {
                tracing::debug!(file = name, "File not in Plex library");
                Ok(false)
            }
        }
    }
}
