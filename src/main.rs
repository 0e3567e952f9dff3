use std::{process, sync::Arc};

use apalis::prelude::{Monitor, WorkerBuilder, WorkerFactoryFn};
use apalis_cron::CronStream;
use pixfeed::{
    application::{
        error::AppError,
        feed::{FeedRanker, FeedRankerConfig, FeedService},
        images::ImageCacheService,
        jobs::{RankFeedsContext, process_rank_feeds_job, rank_feeds_schedule},
    },
    breaker::{BreakerConfig, CircuitBreaker},
    cache::{DiskCacheConfig, LruFileCache},
    config,
    domain::entities::FeedEntry,
    infra::{
        db::PostgresRepositories, error::InfraError, object_store::HttpObjectStore, telemetry,
    },
};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

const OBJECT_STORE_BREAKER: &str = "object-store";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %report.chain(), "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %report.chain(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Run(config::RunArgs::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Run(_) => run_worker(settings).await,
        config::Command::RankFeeds(_) => run_rank_feeds(settings).await,
        config::Command::FetchImage(args) => run_fetch_image(settings, args).await,
        config::Command::ShowFeed(args) => run_show_feed(settings, args).await,
    }
}

async fn run_worker(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let ranker = Arc::new(build_ranker(repositories, &settings));
    let schedule = rank_feeds_schedule(&settings.feed.schedule)
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;

    let worker = WorkerBuilder::new("rank-feeds-worker")
        .data(RankFeedsContext { ranker })
        .backend(CronStream::new(schedule))
        .build_fn(process_rank_feeds_job);
    let monitor = Monitor::new().register(worker);

    info!(
        target = "pixfeed::run",
        schedule = settings.feed.schedule.as_str(),
        "Feed ranking worker started"
    );

    tokio::select! {
        result = monitor.run() => {
            result.map_err(|err| AppError::unexpected(format!("job monitor stopped: {err}")))?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(InfraError::from)?;
            info!(target = "pixfeed::run", "Shutdown signal received");
        }
    }

    Ok(())
}

async fn run_rank_feeds(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let ranker = build_ranker(repositories, &settings);

    let report = ranker.run().await?;
    print_json(&report)
}

async fn run_fetch_image(
    settings: config::Settings,
    args: config::FetchImageArgs,
) -> Result<(), AppError> {
    let base_url = settings
        .object_store
        .base_url
        .as_deref()
        .ok_or_else(|| InfraError::configuration("object store base url is not configured"))?;

    let cache = LruFileCache::open(&DiskCacheConfig::from(&settings.disk_cache))
        .map_err(InfraError::from)?;
    let store = HttpObjectStore::new(base_url, settings.object_store.timeout)?;
    let breaker = CircuitBreaker::new(
        OBJECT_STORE_BREAKER,
        BreakerConfig::from(&settings.breaker),
    )
    .map_err(InfraError::from)?;

    let images = ImageCacheService::new(cache, Arc::new(store), breaker);
    let image = images.fetch(&args.key).await?;

    info!(
        target = "pixfeed::fetch_image",
        key = args.key.as_str(),
        origin = image.origin.as_str(),
        "Image resolved"
    );
    println!("{}", image.path.display());
    Ok(())
}

async fn run_show_feed(
    settings: config::Settings,
    args: config::ShowFeedArgs,
) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let feed = FeedService::new(repositories);

    let entries = feed.get_feed(&args.user_id).await?;
    let view = entries
        .iter()
        .map(FeedEntryView::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    print_json(&view)
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool =
        PostgresRepositories::connect(database_url, settings.database.max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

fn build_ranker(repositories: Arc<PostgresRepositories>, settings: &config::Settings) -> FeedRanker {
    FeedRanker::new(
        repositories.clone(),
        repositories.clone(),
        repositories.clone(),
        repositories,
        FeedRankerConfig::from(&settings.feed),
    )
}

#[derive(Serialize)]
struct FeedEntryView<'a> {
    rank: u16,
    image_id: String,
    owner_id: &'a str,
    published_at: String,
}

impl<'a> TryFrom<&'a FeedEntry> for FeedEntryView<'a> {
    type Error = AppError;

    fn try_from(entry: &'a FeedEntry) -> Result<Self, Self::Error> {
        let published_at = entry
            .published_at
            .format(&Rfc3339)
            .map_err(|err| AppError::unexpected(format!("timestamp formatting failed: {err}")))?;
        Ok(Self {
            rank: entry.rank,
            image_id: entry.image_id.to_string(),
            owner_id: entry.owner_id.as_str(),
            published_at,
        })
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to encode output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
