//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

/// Image published by `owner_id` into one of their albums.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub image_id: Uuid,
    pub owner_id: String,
    pub album_name: String,
    pub published_at: OffsetDateTime,
}

/// Image considered for a follower's feed, with its popularity counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateImage {
    pub image_id: Uuid,
    pub owner_id: String,
    pub published_at: OffsetDateTime,
    pub popularity: i64,
}

impl CandidateImage {
    pub fn new(image: ImageRecord, popularity: i64) -> Self {
        Self {
            image_id: image.image_id,
            owner_id: image.owner_id,
            published_at: image.published_at,
            popularity,
        }
    }
}

/// One row of a user's materialized timeline, keyed by `(user_id, rank)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedEntry {
    pub user_id: String,
    pub rank: u16,
    pub image_id: Uuid,
    pub owner_id: String,
    pub published_at: OffsetDateTime,
}
