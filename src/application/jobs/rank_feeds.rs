//! Cron job materializing every follower's feed.

use std::str::FromStr;

use apalis::prelude::*;
use apalis_cron::{CronContext, Schedule};
use chrono::Utc;
use thiserror::Error;
use tracing::{error, info};

use super::context::{RankFeedsContext, job_failed};

pub const DEFAULT_RANK_FEEDS_SCHEDULE: &str = "0 0 * * * *";

/// Marker for one tick of the feed ranking schedule.
/// apalis-cron builds it with `Default`; the tick time arrives as [`CronContext`].
#[derive(Default, Debug, Clone)]
pub struct RankFeedsJob;

#[derive(Debug, Error)]
#[error("invalid cron expression `{expression}`: {message}")]
pub struct InvalidSchedule {
    pub expression: String,
    pub message: String,
}

pub async fn process_rank_feeds_job(
    _job: RankFeedsJob,
    tick: CronContext<Utc>,
    ctx: Data<RankFeedsContext>,
) -> Result<(), apalis::prelude::Error> {
    let scheduled_at = tick.get_timestamp();
    match ctx.ranker.run().await {
        Ok(run) => {
            info!(
                target = "application::jobs::rank_feeds",
                scheduled_at = %scheduled_at,
                followers = run.followers,
                written = run.written,
                failed = run.failed,
                "Scheduled feed ranking finished"
            );
            Ok(())
        }
        Err(err) => {
            error!(
                target = "application::jobs::rank_feeds",
                scheduled_at = %scheduled_at,
                error = %err,
                "Scheduled feed ranking aborted"
            );
            Err(job_failed(err))
        }
    }
}

/// Parse the six-field cron expression (seconds first) driving the job.
pub fn rank_feeds_schedule(expression: &str) -> Result<Schedule, InvalidSchedule> {
    Schedule::from_str(expression).map_err(|err| InvalidSchedule {
        expression: expression.to_string(),
        message: err.to_string(),
    })
}
