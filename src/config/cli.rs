use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the pixfeed binary.
#[derive(Debug, Parser)]
#[command(
    name = "pixfeed",
    version,
    about = "Image cache and feed ranking worker"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PIXFEED_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the scheduled feed ranking worker until interrupted.
    Run(RunArgs),
    /// Rank every follower's feed once and print the run report.
    #[command(name = "rank-feeds")]
    RankFeeds(RankFeedsArgs),
    /// Resolve an image through the disk cache and print its local path.
    #[command(name = "fetch-image")]
    FetchImage(FetchImageArgs),
    /// Print a user's materialized feed as JSON.
    #[command(name = "show-feed")]
    ShowFeed(ShowFeedArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct CommonOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct FeedOverrides {
    /// Override the number of followers ranked concurrently.
    #[arg(long = "feed-concurrency", value_name = "COUNT")]
    pub concurrency: Option<u64>,

    /// Override the maximum number of entries kept per feed.
    #[arg(long = "feed-max-entries", value_name = "COUNT")]
    pub max_entries: Option<u64>,

    /// Override how far back images are considered, in seconds.
    #[arg(long = "feed-window-seconds", value_name = "SECONDS")]
    pub window_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    #[command(flatten)]
    pub feed: FeedOverrides,

    /// Override the six-field cron expression driving feed ranking.
    #[arg(long = "feed-schedule", value_name = "CRON")]
    pub schedule: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RankFeedsArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    #[command(flatten)]
    pub feed: FeedOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct FetchImageArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    /// Override the disk cache directory.
    #[arg(long = "cache-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub cache_dir: Option<PathBuf>,

    /// Override the disk cache size bound in bytes.
    #[arg(long = "cache-max-bytes", value_name = "BYTES")]
    pub cache_max_bytes: Option<u64>,

    /// Override the object store base URL.
    #[arg(long = "object-store-url", value_name = "URL")]
    pub object_store_url: Option<String>,

    /// Key of the image to resolve.
    #[arg(value_name = "KEY")]
    pub key: String,
}

#[derive(Debug, Args, Clone)]
pub struct ShowFeedArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    /// User whose feed is printed.
    #[arg(value_name = "USER_ID")]
    pub user_id: String,
}
