//! Logging and metrics bootstrap.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber writing to stderr, and describe metrics.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pixfeed_disk_cache_hit_total",
            Unit::Count,
            "Total number of disk cache lookups served from a cached file."
        );
        describe_counter!(
            "pixfeed_disk_cache_miss_total",
            Unit::Count,
            "Total number of disk cache lookups for keys not cached."
        );
        describe_counter!(
            "pixfeed_disk_cache_evict_total",
            Unit::Count,
            "Total number of disk cache entries evicted to stay within the size bound."
        );
        describe_gauge!(
            "pixfeed_disk_cache_bytes",
            Unit::Bytes,
            "Summed size of the files held by the disk cache."
        );
        describe_counter!(
            "pixfeed_breaker_transition_total",
            Unit::Count,
            "Total number of circuit breaker state changes."
        );
        describe_counter!(
            "pixfeed_breaker_bypass_total",
            Unit::Count,
            "Total number of calls rejected by a circuit breaker."
        );
        describe_counter!(
            "pixfeed_breaker_failure_total",
            Unit::Count,
            "Total number of monitored failures observed by a circuit breaker."
        );
        describe_histogram!(
            "pixfeed_feed_rank_run_ms",
            Unit::Milliseconds,
            "Duration of a full feed ranking pass in milliseconds."
        );
        describe_counter!(
            "pixfeed_feed_rank_failed_total",
            Unit::Count,
            "Total number of followers whose feed could not be ranked."
        );
    });
}
