//! Image records and the status state machine.

use crate::format::ImageFormat;
use crate::hash::ContentHash;
use crate::key::ImageKey;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifecycle status of a stored image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    /// Metadata row created, blob write not yet confirmed.
    Pending,
    /// Blob durably present, record visible to readers.
    Committed,
    /// Blob never completed within the grace window; awaiting purge.
    Orphaned,
    /// Tombstoned by an explicit delete; awaiting physical cleanup.
    Deleted,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Committed => "committed",
            Self::Orphaned => "orphaned",
            Self::Deleted => "deleted",
        }
    }

    /// Parse the stored string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "committed" => Ok(Self::Committed),
            "orphaned" => Ok(Self::Orphaned),
            "deleted" => Ok(Self::Deleted),
            other => Err(crate::Error::InvalidStatus(other.to_string())),
        }
    }

    /// Whether a record in this status is visible to readers.
    pub fn is_visible(&self) -> bool {
        matches!(self, Self::Committed)
    }

    /// Whether the status is terminal (record will eventually be purged).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Orphaned | Self::Deleted)
    }
}

/// One logical stored image.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Content-addressed key, assigned at upload time.
    pub key: ImageKey,
    /// SHA-256 checksum of the blob.
    pub checksum: ContentHash,
    /// Blob size in bytes.
    pub size_bytes: u64,
    /// Sniffed image format.
    pub format: ImageFormat,
    /// Lifecycle status.
    pub status: ImageStatus,
    /// When the pending row was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the record became visible; None until commit.
    #[serde(with = "time::serde::rfc3339::option")]
    pub committed_at: Option<OffsetDateTime>,
    /// When the record was tombstoned; None until deletion.
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

impl ImageRecord {
    /// Create a fresh pending record for a payload.
    pub fn new_pending(checksum: ContentHash, size_bytes: u64, format: ImageFormat) -> Self {
        Self {
            key: ImageKey::from_hash(&checksum),
            checksum,
            size_bytes,
            format,
            status: ImageStatus::Pending,
            created_at: OffsetDateTime::now_utc(),
            committed_at: None,
            deleted_at: None,
        }
    }
}
