mod context;
mod rank_feeds;

pub use context::{RankFeedsContext, job_failed};
pub use rank_feeds::{
    DEFAULT_RANK_FEEDS_SCHEDULE, InvalidSchedule, RankFeedsJob, process_rank_feeds_job,
    rank_feeds_schedule,
};
