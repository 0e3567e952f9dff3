//! Ordering rules for materialized feeds.

use std::cmp::Ordering;

use time::{OffsetDateTime, Time};

use super::entities::{CandidateImage, FeedEntry};

/// Drop minutes and below, keeping the date, hour and offset.
pub fn truncate_to_hour(timestamp: OffsetDateTime) -> OffsetDateTime {
    let hour = timestamp.time().hour();
    match Time::from_hms(hour, 0, 0) {
        Ok(time) => timestamp.replace_time(time),
        Err(_) => timestamp,
    }
}

/// Relevance order: newest hour bucket first, then most popular.
///
/// Candidates equal on both keys are ordered by exact publication time
/// (newest first) and then by image id, so the result never depends on the
/// order candidates were fetched in.
pub fn compare_relevance(left: &CandidateImage, right: &CandidateImage) -> Ordering {
    truncate_to_hour(right.published_at)
        .cmp(&truncate_to_hour(left.published_at))
        .then_with(|| right.popularity.cmp(&left.popularity))
        .then_with(|| right.published_at.cmp(&left.published_at))
        .then_with(|| left.image_id.cmp(&right.image_id))
}

/// Sort `candidates` by relevance, keep the first `limit`, and assign ranks.
pub fn rank_candidates(
    user_id: &str,
    mut candidates: Vec<CandidateImage>,
    limit: usize,
) -> Vec<FeedEntry> {
    candidates.sort_by(compare_relevance);
    candidates.truncate(limit.min(usize::from(u16::MAX)));

    candidates
        .into_iter()
        .zip(0u16..)
        .map(|(candidate, rank)| FeedEntry {
            user_id: user_id.to_string(),
            rank,
            image_id: candidate.image_id,
            owner_id: candidate.owner_id,
            published_at: candidate.published_at,
        })
        .collect()
}
