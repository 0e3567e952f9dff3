//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{FeedEntry, ImageRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Who follows whom.
#[async_trait]
pub trait SocialGraphRepo: Send + Sync {
    /// Every distinct user following at least one other user.
    async fn list_followers(&self) -> Result<Vec<String>, RepoError>;

    async fn list_followed(&self, follower_id: &str) -> Result<Vec<String>, RepoError>;
}

#[async_trait]
pub trait ImagesRepo: Send + Sync {
    async fn list_albums(&self, owner_id: &str) -> Result<Vec<String>, RepoError>;

    /// Images of `owner_id` in any of `albums` published strictly after `since`.
    async fn recent_images(
        &self,
        owner_id: &str,
        albums: &[String],
        since: OffsetDateTime,
    ) -> Result<Vec<ImageRecord>, RepoError>;
}

#[async_trait]
pub trait PopularityRepo: Send + Sync {
    /// Counter value for `image_id`; images never counted report zero.
    async fn image_popularity(&self, image_id: Uuid) -> Result<i64, RepoError>;
}

#[async_trait]
pub trait FeedsRepo: Send + Sync {
    /// Replace the whole feed of `user_id` with `entries` as one batch.
    async fn replace_feed(&self, user_id: &str, entries: &[FeedEntry]) -> Result<(), RepoError>;

    /// Stored entries of `user_id` ordered by rank.
    async fn get_feed(&self, user_id: &str) -> Result<Vec<FeedEntry>, RepoError>;
}
