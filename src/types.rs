//! Core types for podcast-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// Integer row identifiers share one shape: a transparent i64 newtype that binds
// and decodes as an SQLite INTEGER.
macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl PartialEq<i64> for $name {
            fn eq(&self, other: &i64) -> bool {
                self.0 == *other
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

row_id!(
    /// Unique identifier for a subscription
    SubscriptionId
);

row_id!(
    /// Unique identifier for an item (one media entry of a subscription)
    ItemId
);

row_id!(
    /// Unique identifier for a download record
    DownloadId
);

/// Download status
///
/// The lowercase tokens are the storage vocabulary; other components read them
/// directly from the `downloads.status` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Admitted, waiting for a concurrency slot
    Pending,
    /// A transfer owns this record
    Downloading,
    /// File is on disk and verified
    Completed,
    /// Last attempt failed; see `error_message` and `retry_count`
    Failed,
    /// Cancelled before completion
    Deleted,
}

impl Status {
    /// All statuses in lifecycle order
    pub const ALL: [Status; 5] = [
        Status::Pending,
        Status::Downloading,
        Status::Completed,
        Status::Failed,
        Status::Deleted,
    ];

    /// Storage token for this status
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Downloading => "downloading",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Deleted => "deleted",
        }
    }

    /// Whether `enqueue` may reset this status back to pending
    pub fn is_requeueable(&self) -> bool {
        matches!(self, Status::Failed | Status::Deleted)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown download status: {s}"))
    }
}

impl sqlx::Type<sqlx::Sqlite> for Status {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <str as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for Status {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.as_str().to_owned(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for Status {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let token = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(token.parse::<Status>()?)
    }
}

/// Escalating free-space levels reported by the disk check
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskSpaceLevel {
    /// 10 GiB or more available
    Ok,
    /// Below 10 GiB
    Info,
    /// Below 5 GiB
    Warning,
    /// Below 1 GiB
    Critical,
}

impl DiskSpaceLevel {
    /// Classify an available byte count
    pub fn from_available(available: u64) -> Self {
        const GIB: u64 = crate::config::GIB;
        if available < GIB {
            DiskSpaceLevel::Critical
        } else if available < 5 * GIB {
            DiskSpaceLevel::Warning
        } else if available < 10 * GIB {
            DiskSpaceLevel::Info
        } else {
            DiskSpaceLevel::Ok
        }
    }
}

/// Outcome of one retention sweep
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    /// Subscriptions evaluated without error
    pub subscriptions_evaluated: usize,
    /// Subscriptions whose evaluation failed (others still ran)
    pub subscriptions_failed: usize,
    /// Download records removed
    pub deleted: usize,
    /// Older downloads kept because the oracle reported them unconsumed
    pub kept_unplayed: usize,
    /// Bytes reclaimed from deleted files
    pub freed_bytes: u64,
}

/// Outcome of refreshing one or more subscriptions
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    /// Subscriptions refreshed successfully
    pub refreshed: usize,
    /// Subscriptions whose refresh failed (others still ran)
    pub failed: usize,
    /// Items stored for the first time
    pub new_items: usize,
    /// Downloads admitted by auto-download
    pub queued: usize,
}

/// Event emitted during the download lifecycle
///
/// Delivered over a broadcast channel; slow subscribers may miss events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Download admitted (new record or reset to pending)
    Queued {
        /// Download ID
        id: DownloadId,
        /// Item being downloaded
        item_id: ItemId,
        /// Destination path relative to the download root
        path: PathBuf,
    },

    /// Transfer acquired a slot and moved to downloading
    Started {
        /// Download ID
        id: DownloadId,
    },

    /// Throttled progress update
    Progress {
        /// Download ID
        id: DownloadId,
        /// Bytes on disk so far, including any resumed prefix
        downloaded_bytes: u64,
        /// Expected total, when the server reported one
        #[serde(skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
        /// Fraction complete (0.0 to 1.0)
        progress: f64,
    },

    /// File verified and record completed
    Completed {
        /// Download ID
        id: DownloadId,
        /// Final file location
        path: PathBuf,
        /// Actual size on disk
        size_bytes: u64,
    },

    /// Attempt failed and was recorded on the download
    Failed {
        /// Download ID
        id: DownloadId,
        /// Error message stored on the record
        error: String,
        /// Retry counter after this failure
        retry_count: i64,
    },

    /// Download cancelled (status flipped to deleted)
    Cancelled {
        /// Download ID
        id: DownloadId,
    },

    /// Download record removed
    Removed {
        /// Download ID
        id: DownloadId,
    },

    /// Retention sweep finished
    RetentionSweep {
        /// Summary of the sweep
        report: RetentionReport,
    },

    /// Free space dropped below an informational threshold
    DiskSpaceLow {
        /// Available bytes on the download filesystem
        available: u64,
        /// Severity of the shortfall
        level: DiskSpaceLevel,
    },
}
