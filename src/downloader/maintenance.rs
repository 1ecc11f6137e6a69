//! Periodic maintenance: retention sweep and free-space check.

use crate::error::Result;
use crate::retention::RetentionEvaluator;
use crate::types::{DiskSpaceLevel, Event, RetentionReport};
use crate::utils::format_bytes;

use super::PodcastDownloader;

impl PodcastDownloader {
    /// Evaluator over this downloader's store, files and oracle
    pub fn retention_evaluator(&self) -> RetentionEvaluator {
        RetentionEvaluator::new(self.db.clone(), self.files.clone(), self.oracle.clone())
    }

    /// Run one retention sweep across all subscriptions
    ///
    /// Does nothing when retention is disabled in the configuration.
    pub async fn run_retention(&self) -> Result<RetentionReport> {
        if !self.config.retention.enabled {
            tracing::debug!("Retention disabled, skipping sweep");
            return Ok(RetentionReport::default());
        }

        let report = self.retention_evaluator().sweep().await?;
        self.emit_event(Event::RetentionSweep {
            report: report.clone(),
        });
        Ok(report)
    }

    /// Check free space on the download filesystem
    ///
    /// Logs at info below 10 GiB, warn below 5 GiB and error below 1 GiB, and
    /// emits [`Event::DiskSpaceLow`] for any level other than `Ok`. Never
    /// blocks other operations.
    pub async fn check_disk_space(&self) -> Result<DiskSpaceLevel> {
        let available = self.files.available_space()?;
        let level = DiskSpaceLevel::from_available(available);
        let free = format_bytes(available);

        match level {
            DiskSpaceLevel::Ok => tracing::debug!(available = %free, "Disk space OK"),
            DiskSpaceLevel::Info => tracing::info!(available = %free, "Disk space below 10 GB"),
            DiskSpaceLevel::Warning => tracing::warn!(available = %free, "Low disk space"),
            DiskSpaceLevel::Critical => tracing::error!(available = %free, "Critically low disk space"),
        }

        if level != DiskSpaceLevel::Ok {
            self.emit_event(Event::DiskSpaceLow { available, level });
        }
        Ok(level)
    }
}
