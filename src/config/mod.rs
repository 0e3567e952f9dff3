//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;
#[cfg(test)]
mod tests;

use std::{
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CliArgs, Command, CommonOverrides, FeedOverrides, FetchImageArgs, RankFeedsArgs, RunArgs,
    ShowFeedArgs,
};

use crate::application::jobs::rank_feeds_schedule;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pixfeed";
const ENV_PREFIX: &str = "PIXFEED";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_CACHE_DIR: &str = "cache";
const DEFAULT_CACHE_MAX_BYTES: u64 = 512 * 1024 * 1024;
const DEFAULT_OBJECT_STORE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_BREAKER_MONITOR_SECS: u64 = 60;
const DEFAULT_BREAKER_FAILURE_RATE: f64 = 0.5;
const DEFAULT_BREAKER_MIN_CALLS_TRIGGER: u64 = 10;
const DEFAULT_BREAKER_OPEN_SECS: u64 = 60;
const DEFAULT_BREAKER_PASSTHROUGH_RATE: f64 = 0.5;
const DEFAULT_BREAKER_RECOVER_RATE: f64 = 0.1;
const DEFAULT_BREAKER_MIN_CALLS_RECOVER: u64 = 10;
const DEFAULT_FEED_SCHEDULE: &str = crate::application::jobs::DEFAULT_RANK_FEEDS_SCHEDULE;
const DEFAULT_FEED_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_FEED_MAX_ENTRIES: u64 = 100;
const DEFAULT_FEED_CONCURRENCY: u64 = 8;
const MAX_FEED_ENTRIES: u64 = u16::MAX as u64;

#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub disk_cache: DiskCacheSettings,
    pub object_store: ObjectStoreSettings,
    pub breaker: BreakerSettings,
    pub feed: FeedSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct DiskCacheSettings {
    pub cache_dir: PathBuf,
    pub max_size_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct ObjectStoreSettings {
    /// Base URL without a trailing slash; objects live at `{base_url}/{key}`.
    pub base_url: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_monitor_timeout: Duration,
    pub failure_rate_trigger: f64,
    pub min_calls_trigger: NonZeroU32,
    pub open_timeout: Duration,
    pub half_open_passthrough_rate: f64,
    pub recover_rate: f64,
    pub min_calls_recover: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Six-field cron expression, already checked to parse.
    pub schedule: String,
    pub window: Duration,
    pub max_entries: NonZeroUsize,
    pub concurrency: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Run(args)) => raw.apply_run_overrides(args),
        Some(Command::RankFeeds(args)) => {
            raw.apply_common_overrides(&args.common);
            raw.apply_feed_overrides(&args.feed);
        }
        Some(Command::FetchImage(args)) => raw.apply_fetch_image_overrides(args),
        Some(Command::ShowFeed(args)) => raw.apply_common_overrides(&args.common),
        None => raw.apply_run_overrides(&RunArgs::default()),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    disk_cache: RawDiskCacheSettings,
    object_store: RawObjectStoreSettings,
    breaker: RawBreakerSettings,
    feed: RawFeedSettings,
}

impl RawSettings {
    fn apply_common_overrides(&mut self, overrides: &CommonOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_feed_overrides(&mut self, overrides: &FeedOverrides) {
        if let Some(value) = overrides.concurrency {
            self.feed.concurrency = Some(value);
        }
        if let Some(value) = overrides.max_entries {
            self.feed.max_entries = Some(value);
        }
        if let Some(value) = overrides.window_seconds {
            self.feed.window_seconds = Some(value);
        }
    }

    fn apply_run_overrides(&mut self, args: &RunArgs) {
        self.apply_common_overrides(&args.common);
        self.apply_feed_overrides(&args.feed);
        if let Some(schedule) = args.schedule.as_ref() {
            self.feed.schedule = Some(schedule.clone());
        }
    }

    fn apply_fetch_image_overrides(&mut self, args: &FetchImageArgs) {
        self.apply_common_overrides(&args.common);
        if let Some(dir) = args.cache_dir.as_ref() {
            self.disk_cache.cache_dir = Some(dir.clone());
        }
        if let Some(bytes) = args.cache_max_bytes {
            self.disk_cache.max_size_bytes = Some(bytes);
        }
        if let Some(url) = args.object_store_url.as_ref() {
            self.object_store.base_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            disk_cache,
            object_store,
            breaker,
            feed,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            disk_cache: build_disk_cache_settings(disk_cache)?,
            object_store: build_object_store_settings(object_store)?,
            breaker: build_breaker_settings(breaker)?,
            feed: build_feed_settings(feed)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_disk_cache_settings(
    disk_cache: RawDiskCacheSettings,
) -> Result<DiskCacheSettings, LoadError> {
    let cache_dir = disk_cache
        .cache_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    if cache_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "disk_cache.cache_dir",
            "path must not be empty",
        ));
    }

    let max_size_bytes = NonZeroU64::new(
        disk_cache
            .max_size_bytes
            .unwrap_or(DEFAULT_CACHE_MAX_BYTES),
    )
    .ok_or_else(|| LoadError::invalid("disk_cache.max_size_bytes", "must be greater than zero"))?;

    Ok(DiskCacheSettings {
        cache_dir,
        max_size_bytes,
    })
}

fn build_object_store_settings(
    object_store: RawObjectStoreSettings,
) -> Result<ObjectStoreSettings, LoadError> {
    let base_url = match non_blank(object_store.base_url) {
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
            Some(url.trim_end_matches('/').to_string())
        }
        Some(url) => {
            return Err(LoadError::invalid(
                "object_store.base_url",
                format!("`{url}` is not an http(s) URL"),
            ));
        }
        None => None,
    };

    let timeout = positive_seconds(
        object_store
            .timeout_seconds
            .unwrap_or(DEFAULT_OBJECT_STORE_TIMEOUT_SECS),
        "object_store.timeout_seconds",
    )?;

    Ok(ObjectStoreSettings { base_url, timeout })
}

fn build_breaker_settings(breaker: RawBreakerSettings) -> Result<BreakerSettings, LoadError> {
    Ok(BreakerSettings {
        failure_monitor_timeout: positive_seconds(
            breaker
                .failure_monitor_timeout_seconds
                .unwrap_or(DEFAULT_BREAKER_MONITOR_SECS),
            "breaker.failure_monitor_timeout_seconds",
        )?,
        failure_rate_trigger: unit_rate(
            breaker
                .failure_rate_trigger
                .unwrap_or(DEFAULT_BREAKER_FAILURE_RATE),
            "breaker.failure_rate_trigger",
        )?,
        min_calls_trigger: non_zero_u32(
            breaker
                .min_calls_trigger
                .unwrap_or(DEFAULT_BREAKER_MIN_CALLS_TRIGGER),
            "breaker.min_calls_trigger",
        )?,
        open_timeout: positive_seconds(
            breaker
                .open_timeout_seconds
                .unwrap_or(DEFAULT_BREAKER_OPEN_SECS),
            "breaker.open_timeout_seconds",
        )?,
        half_open_passthrough_rate: unit_rate(
            breaker
                .half_open_passthrough_rate
                .unwrap_or(DEFAULT_BREAKER_PASSTHROUGH_RATE),
            "breaker.half_open_passthrough_rate",
        )?,
        recover_rate: unit_rate(
            breaker.recover_rate.unwrap_or(DEFAULT_BREAKER_RECOVER_RATE),
            "breaker.recover_rate",
        )?,
        min_calls_recover: non_zero_u32(
            breaker
                .min_calls_recover
                .unwrap_or(DEFAULT_BREAKER_MIN_CALLS_RECOVER),
            "breaker.min_calls_recover",
        )?,
    })
}

fn build_feed_settings(feed: RawFeedSettings) -> Result<FeedSettings, LoadError> {
    let schedule = feed
        .schedule
        .unwrap_or_else(|| DEFAULT_FEED_SCHEDULE.to_string());
    rank_feeds_schedule(&schedule)
        .map_err(|err| LoadError::invalid("feed.schedule", err.to_string()))?;

    let window = positive_seconds(
        feed.window_seconds.unwrap_or(DEFAULT_FEED_WINDOW_SECS),
        "feed.window_seconds",
    )?;

    let max_entries = feed.max_entries.unwrap_or(DEFAULT_FEED_MAX_ENTRIES);
    if max_entries > MAX_FEED_ENTRIES {
        return Err(LoadError::invalid(
            "feed.max_entries",
            format!("must not exceed {MAX_FEED_ENTRIES}"),
        ));
    }

    Ok(FeedSettings {
        schedule,
        window,
        max_entries: non_zero_usize(max_entries, "feed.max_entries")?,
        concurrency: non_zero_usize(
            feed.concurrency.unwrap_or(DEFAULT_FEED_CONCURRENCY),
            "feed.concurrency",
        )?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDiskCacheSettings {
    cache_dir: Option<PathBuf>,
    max_size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawObjectStoreSettings {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBreakerSettings {
    failure_monitor_timeout_seconds: Option<u64>,
    failure_rate_trigger: Option<f64>,
    min_calls_trigger: Option<u64>,
    open_timeout_seconds: Option<u64>,
    half_open_passthrough_rate: Option<f64>,
    recover_rate: Option<f64>,
    min_calls_recover: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFeedSettings {
    schedule: Option<String>,
    window_seconds: Option<u64>,
    max_entries: Option<u64>,
    concurrency: Option<u64>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn unit_rate(value: f64, key: &'static str) -> Result<f64, LoadError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(LoadError::invalid(
            key,
            format!("must be between 0 and 1, got {value}"),
        ))
    }
}
