//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;

/// Image record row.
///
/// `status` is one of the `ImageStatus` string forms; `image_key` and
/// `checksum` are 64-char lowercase hex. Conversions to the domain
/// `ImageRecord` live in the coordinator.
#[derive(Debug, Clone, FromRow)]
pub struct ImageRow {
    pub image_key: String,
    pub checksum: String,
    pub size_bytes: i64,
    pub format: String,
    pub status: String,
    pub created_at: OffsetDateTime,
    pub committed_at: Option<OffsetDateTime>,
    pub deleted_at: Option<OffsetDateTime>,
}
