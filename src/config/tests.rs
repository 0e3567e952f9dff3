use super::*;

fn fetch_args(key: &str) -> FetchImageArgs {
    FetchImageArgs {
        common: CommonOverrides::default(),
        cache_dir: None,
        cache_max_bytes: None,
        object_store_url: None,
        key: key.to_string(),
    }
}

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(settings.database.url, None);
    assert_eq!(settings.disk_cache.cache_dir, PathBuf::from("cache"));
    assert_eq!(settings.disk_cache.max_size_bytes.get(), 512 * 1024 * 1024);
    assert_eq!(settings.breaker.min_calls_trigger.get(), 10);
    assert_eq!(settings.breaker.open_timeout, Duration::from_secs(60));
    assert_eq!(settings.feed.schedule, "0 0 * * * *");
    assert_eq!(settings.feed.window, Duration::from_secs(7 * 24 * 60 * 60));
    assert_eq!(settings.feed.max_entries.get(), 100);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.feed.concurrency = Some(2);

    let args = RunArgs {
        common: CommonOverrides {
            log_level: Some("debug".to_string()),
            ..Default::default()
        },
        feed: FeedOverrides {
            concurrency: Some(16),
            ..Default::default()
        },
        schedule: Some("0 30 * * * *".to_string()),
    };

    raw.apply_run_overrides(&args);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.feed.concurrency.get(), 16);
    assert_eq!(settings.feed.schedule, "0 30 * * * *");
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    raw.apply_common_overrides(&CommonOverrides {
        log_json: Some(true),
        ..Default::default()
    });

    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn fetch_image_overrides_cache_and_store() {
    let mut raw = RawSettings::default();
    let args = FetchImageArgs {
        cache_dir: Some(PathBuf::from("/tmp/pixfeed")),
        cache_max_bytes: Some(4096),
        object_store_url: Some("https://images.example.com/bucket/".to_string()),
        ..fetch_args("cat.jpg")
    };

    raw.apply_fetch_image_overrides(&args);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.disk_cache.cache_dir, PathBuf::from("/tmp/pixfeed"));
    assert_eq!(settings.disk_cache.max_size_bytes.get(), 4096);
    assert_eq!(
        settings.object_store.base_url.as_deref(),
        Some("https://images.example.com/bucket")
    );
}

#[test]
fn blank_database_url_is_treated_as_missing() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.database.url, None);
}

#[test]
fn rejects_zero_cache_size() {
    let mut raw = RawSettings::default();
    raw.disk_cache.max_size_bytes = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero size rejected");

    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "disk_cache.max_size_bytes",
            ..
        }
    ));
}

#[test]
fn rejects_rates_outside_unit_interval() {
    let mut raw = RawSettings::default();
    raw.breaker.half_open_passthrough_rate = Some(1.5);

    let err = Settings::from_raw(raw).expect_err("rate rejected");

    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "breaker.half_open_passthrough_rate",
            ..
        }
    ));
}

#[test]
fn rejects_malformed_schedule() {
    let mut raw = RawSettings::default();
    raw.feed.schedule = Some("hourly".to_string());

    let err = Settings::from_raw(raw).expect_err("schedule rejected");

    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "feed.schedule",
            ..
        }
    ));
}

#[test]
fn rejects_non_http_object_store() {
    let mut raw = RawSettings::default();
    raw.object_store.base_url = Some("ftp://images".to_string());

    let err = Settings::from_raw(raw).expect_err("scheme rejected");

    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "object_store.base_url",
            ..
        }
    ));
}

#[test]
fn rejects_oversized_feed() {
    let mut raw = RawSettings::default();
    raw.feed.max_entries = Some(100_000);

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
#[serial_test::serial]
fn default_to_run_command() {
    let cli = CliArgs::parse_from(["pixfeed"]);
    assert!(cli.command.is_none());

    let settings = load(&cli).expect("defaults load");
    assert_eq!(settings.feed.schedule, DEFAULT_FEED_SCHEDULE);
}

#[test]
fn parses_fetch_image_command() {
    let cli = CliArgs::parse_from([
        "pixfeed",
        "fetch-image",
        "--cache-max-bytes",
        "2048",
        "--log-json",
        "true",
        "cat.jpg",
    ]);

    match cli.command {
        Some(Command::FetchImage(args)) => {
            assert_eq!(args.key, "cat.jpg");
            assert_eq!(args.cache_max_bytes, Some(2048));
            assert_eq!(args.common.log_json, Some(true));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parses_show_feed_and_rank_feeds() {
    let cli = CliArgs::parse_from(["pixfeed", "show-feed", "alice"]);
    assert!(matches!(
        cli.command,
        Some(Command::ShowFeed(ShowFeedArgs { ref user_id, .. })) if user_id == "alice"
    ));

    let cli = CliArgs::parse_from(["pixfeed", "rank-feeds", "--feed-max-entries", "50"]);
    match cli.command {
        Some(Command::RankFeeds(args)) => assert_eq!(args.feed.max_entries, Some(50)),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
#[serial_test::serial]
fn environment_overrides_defaults() {
    // SAFETY: serialized with every other test touching the environment.
    unsafe { std::env::set_var("PIXFEED__FEED__SCHEDULE", "0 15 * * * *") };
    let cli = CliArgs::parse_from(["pixfeed", "rank-feeds"]);
    let loaded = load(&cli);
    unsafe { std::env::remove_var("PIXFEED__FEED__SCHEDULE") };

    let settings = loaded.expect("environment loads");
    assert_eq!(settings.feed.schedule, "0 15 * * * *");
}
