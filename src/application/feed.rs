use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::application::repos::{
    FeedsRepo, ImagesRepo, PopularityRepo, RepoError, SocialGraphRepo,
};
use crate::domain::entities::{CandidateImage, FeedEntry};
use crate::domain::feed::rank_candidates;

const SOURCE: &str = "application::feed";

pub const DEFAULT_FEED_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_MAX_FEED_ENTRIES: usize = 100;
pub const DEFAULT_RANK_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRankerConfig {
    /// Only images published within this window before the run are ranked.
    pub window: Duration,
    pub max_entries: usize,
    /// Followers processed at the same time.
    pub concurrency: usize,
}

impl Default for FeedRankerConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_FEED_WINDOW,
            max_entries: DEFAULT_MAX_FEED_ENTRIES,
            concurrency: DEFAULT_RANK_CONCURRENCY,
        }
    }
}

impl From<&crate::config::FeedSettings> for FeedRankerConfig {
    fn from(settings: &crate::config::FeedSettings) -> Self {
        Self {
            window: settings.window,
            max_entries: settings.max_entries.get(),
            concurrency: settings.concurrency.get(),
        }
    }
}

/// Outcome of one ranking pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankRun {
    pub followers: usize,
    pub written: usize,
    pub failed: usize,
}

/// Materializes every follower's feed from the images of the users they follow.
#[derive(Clone)]
pub struct FeedRanker {
    social: Arc<dyn SocialGraphRepo>,
    images: Arc<dyn ImagesRepo>,
    popularity: Arc<dyn PopularityRepo>,
    feeds: Arc<dyn FeedsRepo>,
    config: FeedRankerConfig,
}

impl FeedRanker {
    pub fn new(
        social: Arc<dyn SocialGraphRepo>,
        images: Arc<dyn ImagesRepo>,
        popularity: Arc<dyn PopularityRepo>,
        feeds: Arc<dyn FeedsRepo>,
        config: FeedRankerConfig,
    ) -> Self {
        Self {
            social,
            images,
            popularity,
            feeds,
            config,
        }
    }

    pub fn config(&self) -> &FeedRankerConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<RankRun, FeedError> {
        self.run_at(OffsetDateTime::now_utc()).await
    }

    /// Rank every follower as of `now`.
    ///
    /// Failing to list followers aborts the run. A failure while ranking one
    /// follower is logged and counted, and the remaining followers proceed.
    pub async fn run_at(&self, now: OffsetDateTime) -> Result<RankRun, FeedError> {
        let started_at = Instant::now();
        let followers = self.social.list_followers().await?;
        let since = now - self.config.window;

        info!(
            target = SOURCE,
            followers = followers.len(),
            since = %since,
            "Feed ranking starting"
        );

        let written = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let concurrency = self.config.concurrency.max(1);

        stream::iter(followers.iter())
            .for_each_concurrent(Some(concurrency), |user_id| {
                let written = written.clone();
                let failed = failed.clone();
                async move {
                    match self.rank_follower(user_id, since).await {
                        Ok(entries) => {
                            debug!(target = SOURCE, user_id, entries, "Feed written");
                            written.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            counter!("pixfeed_feed_rank_failed_total").increment(1);
                            warn!(
                                target = SOURCE,
                                user_id,
                                error = %err,
                                "Feed ranking failed for follower"
                            );
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
            .await;

        let run = RankRun {
            followers: followers.len(),
            written: written.load(Ordering::Relaxed),
            failed: failed.load(Ordering::Relaxed),
        };

        histogram!("pixfeed_feed_rank_run_ms").record(started_at.elapsed().as_secs_f64() * 1000.0);
        info!(
            target = SOURCE,
            followers = run.followers,
            written = run.written,
            failed = run.failed,
            "Feed ranking complete"
        );

        Ok(run)
    }

    /// Rebuild the feed of a single follower, returning the number of entries.
    pub async fn rank_follower(
        &self,
        user_id: &str,
        since: OffsetDateTime,
    ) -> Result<usize, FeedError> {
        let mut candidates = Vec::new();

        for owner_id in self.social.list_followed(user_id).await? {
            let albums = self.images.list_albums(&owner_id).await?;
            if albums.is_empty() {
                continue;
            }

            for image in self.images.recent_images(&owner_id, &albums, since).await? {
                let popularity = self.popularity.image_popularity(image.image_id).await?;
                candidates.push(CandidateImage::new(image, popularity));
            }
        }

        let entries = rank_candidates(user_id, candidates, self.config.max_entries);
        self.feeds.replace_feed(user_id, &entries).await?;
        Ok(entries.len())
    }
}

/// Read side of materialized feeds.
#[derive(Clone)]
pub struct FeedService {
    feeds: Arc<dyn FeedsRepo>,
}

impl FeedService {
    pub fn new(feeds: Arc<dyn FeedsRepo>) -> Self {
        Self { feeds }
    }

    pub async fn get_feed(&self, user_id: &str) -> Result<Vec<FeedEntry>, FeedError> {
        let mut entries = self.feeds.get_feed(user_id).await?;
        entries.sort_by_key(|entry| entry.rank);
        Ok(entries)
    }
}
