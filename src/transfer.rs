//! Resumable HTTP transfers
//!
//! One [`TransferExecutor::execute`] call moves one media file from its URL to
//! its destination:
//!
//! 1. An existing partial file sets the resume offset.
//! 2. Signed or tracking-redirect URLs are fetched as-is; other URLs are first
//!    resolved through a HEAD probe (falling back to the original on error).
//! 3. The GET carries a `Range` header when resuming and a user agent chosen
//!    by URL kind.
//! 4. 416 means the file is already complete, 206 appends, 200 rewrites, and
//!    anything else is an [`DownloadError::HttpStatus`] failure.
//! 5. Progress is reported through a [`ProgressSink`], throttled to steps of
//!    `max(progress_min_fraction * total, progress_min_bytes)` with a final
//!    flush.
//! 6. The final size must match the expected total within `size_tolerance`.
//!    The expected total is the `Content-Range` complete length on a resumed
//!    reply, otherwise the content length plus the resume offset.
//!
//! The whole transfer is bounded by `transfer_timeout` and stops early when
//! its cancellation token fires.

use crate::config::DownloadConfig;
use crate::error::{DownloadError, Error, Result};
use crate::types::DownloadId;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_RANGE, HeaderMap, RANGE, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

/// User agent for signed and tracking URLs: a plain podcast client
pub const PODCAST_CLIENT_USER_AGENT: &str = "Overcast/1.0 Podcast Sync (1 subscribers; feed-id=12345)";

/// User agent for ordinary URLs: a desktop browser
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Query fragments that mark a URL as signed or time-limited
const SIGNATURE_INDICATORS: &[&str] = &[
    "Signature=",
    "Expires=",
    "Key-Pair-Id=",
    "Policy=",
    "signature=",
    "expires=",
    "token=",
    "auth=",
    "hmac=",
];

/// Analytics redirect services whose links must not be probed
const TRACKING_DOMAINS: &[&str] = &[
    "podtrac.com",
    "mgln.ai",
    "chartable.com",
    "podsights.com",
    "podcorn.com",
    "blubrry.com",
    "feedpress.com",
    "backtracks.fm",
    "claritas.com",
    "podscribe.com",
    "spotify-analytics",
    "art19.com",
    "megaphone.fm",
    "simplecast.com",
];

/// Whether a URL is signed/time-limited or routed through a tracking redirect
///
/// Probing such URLs can consume a one-time redirect, so they are fetched
/// directly.
pub fn is_signed_url(url: &str) -> bool {
    if SIGNATURE_INDICATORS.iter().any(|ind| url.contains(ind)) {
        return true;
    }
    let lower = url.to_lowercase();
    TRACKING_DOMAINS.iter().any(|domain| lower.contains(domain))
}

/// Whether `actual` is close enough to `expected` to count as complete
pub fn size_within_tolerance(expected: u64, actual: u64, tolerance: f64) -> bool {
    if expected == actual {
        return true;
    }
    let diff = expected.abs_diff(actual) as f64;
    diff <= expected as f64 * tolerance
}

/// Receiver of throttled progress updates
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Called with the bytes on disk (including any resumed prefix), the
    /// expected total, and their ratio.
    async fn report(&self, id: DownloadId, downloaded: u64, total: u64, fraction: f64);
}

/// Sink that drops every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _id: DownloadId, _downloaded: u64, _total: u64, _fraction: f64) {}
}

/// Byte-step throttle for progress reporting
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    step: u64,
    last_reported: u64,
}

impl ProgressThrottle {
    /// Throttle for a transfer of `total` bytes starting at `start`
    pub fn new(total: u64, start: u64, min_fraction: f64, min_bytes: u64) -> Self {
        let fractional = (total as f64 * min_fraction) as u64;
        Self {
            step: fractional.max(min_bytes).max(1),
            last_reported: start,
        }
    }

    /// Whether `downloaded` has advanced a full step since the last report
    pub fn should_report(&mut self, downloaded: u64) -> bool {
        if downloaded.saturating_sub(self.last_reported) >= self.step {
            self.last_reported = downloaded;
            true
        } else {
            false
        }
    }

    /// Whether anything is left unreported; marks it reported
    pub fn needs_final(&mut self, downloaded: u64) -> bool {
        if downloaded > self.last_reported {
            self.last_reported = downloaded;
            true
        } else {
            false
        }
    }
}

/// What a finished transfer left on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Final size of the destination file
    pub size_bytes: u64,
    /// Expected total reported by the server, if any
    pub expected_bytes: Option<u64>,
    /// Offset the transfer resumed from (0 for a fresh transfer)
    pub resumed_from: u64,
    /// The server answered 416: the partial file was already whole
    pub already_complete: bool,
}

/// Performs single resumable transfers
#[derive(Clone)]
pub struct TransferExecutor {
    client: Client,
    config: DownloadConfig,
}

impl TransferExecutor {
    /// Create an executor with its own HTTP client
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client, config })
    }

    /// Create an executor sharing an existing client
    pub fn with_client(client: Client, config: DownloadConfig) -> Self {
        Self { client, config }
    }

    /// Transfer `url` into `destination`, resuming any partial file
    pub async fn execute(
        &self,
        id: DownloadId,
        url: &str,
        destination: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome> {
        let timeout = self.config.transfer_timeout;
        let work = tokio::time::timeout(timeout, self.run(id, url, destination, progress));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(download_id = id.0, "Transfer cancelled");
                Err(Error::Download(DownloadError::Cancelled { id: id.0 }))
            }
            result = work => match result {
                Ok(result) => result,
                Err(_) => Err(Error::Download(DownloadError::TimedOut {
                    secs: timeout.as_secs(),
                })),
            },
        }
    }

    async fn run(
        &self,
        id: DownloadId,
        url: &str,
        destination: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<TransferOutcome> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let resume_from = match tokio::fs::metadata(destination).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => 0,
        };
        if resume_from > 0 {
            tracing::info!(download_id = id.0, offset = resume_from, "Resuming partial download");
        }

        let signed = is_signed_url(url);
        let target = if signed {
            tracing::debug!(download_id = id.0, "Signed or tracking URL, skipping redirect probe");
            url.to_string()
        } else {
            self.resolve_redirects(url).await
        };

        let mut request = self.client.get(&target);
        request = if signed {
            request.header(USER_AGENT, PODCAST_CLIENT_USER_AGENT)
        } else {
            request
                .header(USER_AGENT, BROWSER_USER_AGENT)
                .header(ACCEPT, "*/*")
                .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
        };
        if resume_from > 0 {
            request = request.header(RANGE, format!("bytes={}-", resume_from));
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            tracing::info!(download_id = id.0, "Server reports file already complete");
            return Ok(TransferOutcome {
                size_bytes: resume_from,
                expected_bytes: None,
                resumed_from: resume_from,
                already_complete: true,
            });
        }

        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(Error::Download(DownloadError::HttpStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            }));
        }

        // A server that ignores Range answers 200 with the whole body
        let appending = status == StatusCode::PARTIAL_CONTENT && resume_from > 0;
        let start = if appending { resume_from } else { 0 };
        // A resumed reply names the complete length in Content-Range; the
        // body length plus the offset stands in when it doesn't
        let range_total = if appending {
            content_range_total(response.headers())
        } else {
            None
        };
        let expected = range_total.or_else(|| {
            response
                .content_length()
                .filter(|len| *len > 0)
                .map(|len| len + start)
        });

        let file = if appending {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(destination)
                .await?
        } else {
            tokio::fs::File::create(destination).await?
        };
        let mut writer = BufWriter::with_capacity(self.config.chunk_size, file);

        let mut throttle = expected.map(|total| {
            ProgressThrottle::new(
                total,
                start,
                self.config.progress_min_fraction,
                self.config.progress_min_bytes,
            )
        });

        let mut downloaded = start;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if let (Some(total), Some(throttle)) = (expected, throttle.as_mut())
                && throttle.should_report(downloaded)
            {
                progress
                    .report(id, downloaded, total, fraction(downloaded, total))
                    .await;
            }
        }

        writer.flush().await?;
        writer.into_inner().sync_all().await?;

        if let (Some(total), Some(throttle)) = (expected, throttle.as_mut())
            && throttle.needs_final(downloaded)
        {
            progress
                .report(id, downloaded, total, fraction(downloaded, total))
                .await;
        }

        let actual = tokio::fs::metadata(destination).await?.len();
        if let Some(total) = expected
            && !size_within_tolerance(total, actual, self.config.size_tolerance)
        {
            return Err(Error::Download(DownloadError::SizeMismatch {
                expected: total,
                actual,
            }));
        }

        Ok(TransferOutcome {
            size_bytes: actual,
            expected_bytes: expected,
            resumed_from: start,
            already_complete: false,
        })
    }

    /// Follow redirects with a HEAD request; the original URL on any error
    async fn resolve_redirects(&self, url: &str) -> String {
        match self
            .client
            .head(url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await
        {
            Ok(response) => {
                let resolved = response.url().to_string();
                if resolved != url {
                    tracing::debug!(from = url, to = %resolved, "URL redirected");
                }
                resolved
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "Could not resolve redirects, using original URL");
                url.to_string()
            }
        }
    }
}

/// Complete length from a `Content-Range: bytes a-b/total` header
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit_once('/')
        .and_then(|(_, total)| total.trim().parse().ok())
        .filter(|total| *total > 0)
}

fn fraction(downloaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (downloaded as f64 / total as f64).clamp(0.0, 1.0)
}
