use std::sync::Arc;
use std::time::Duration;

use pixfeed::application::feed::{FeedRanker, FeedRankerConfig, FeedService};
use pixfeed::application::repos::{FeedsRepo, ImagesRepo, PopularityRepo, SocialGraphRepo};
use pixfeed::infra::db::PostgresRepositories;
use sqlx::PgPool;
use time::OffsetDateTime;
use time::macros::datetime;
use uuid::Uuid;

const NOW: OffsetDateTime = datetime!(2024-05-01 12:30 UTC);

async fn follow(pool: &PgPool, follower: &str, followed: &str) {
    sqlx::query("INSERT INTO user_follows (follower_id, followed_id) VALUES ($1, $2)")
        .bind(follower)
        .bind(followed)
        .execute(pool)
        .await
        .expect("insert follow");
}

async fn album(pool: &PgPool, owner: &str, name: &str) {
    sqlx::query("INSERT INTO user_albums (owner_id, album_name) VALUES ($1, $2)")
        .bind(owner)
        .bind(name)
        .execute(pool)
        .await
        .expect("insert album");
}

async fn image(
    pool: &PgPool,
    owner: &str,
    album: &str,
    published_at: OffsetDateTime,
    popularity: Option<i64>,
) -> Uuid {
    let image_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO images_by_user (image_id, owner_id, album_name, published_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(image_id)
    .bind(owner)
    .bind(album)
    .bind(published_at)
    .execute(pool)
    .await
    .expect("insert image");

    if let Some(popularity) = popularity {
        sqlx::query("INSERT INTO image_popularity (image_id, popularity) VALUES ($1, $2)")
            .bind(image_id)
            .bind(popularity)
            .execute(pool)
            .await
            .expect("insert popularity");
    }
    image_id
}

fn ranker(repos: Arc<PostgresRepositories>, max_entries: usize) -> FeedRanker {
    FeedRanker::new(
        repos.clone(),
        repos.clone(),
        repos.clone(),
        repos,
        FeedRankerConfig {
            window: Duration::from_secs(24 * 60 * 60),
            max_entries,
            concurrency: 4,
        },
    )
}

#[sqlx::test(migrations = "./migrations")]
async fn social_graph_lists_distinct_followers(pool: PgPool) {
    follow(&pool, "bob", "alice").await;
    follow(&pool, "bob", "carol").await;
    follow(&pool, "dave", "alice").await;
    let repos = PostgresRepositories::new(pool);

    assert_eq!(repos.list_followers().await.expect("followers"), ["bob", "dave"]);
    assert_eq!(repos.list_followed("bob").await.expect("followed"), ["alice", "carol"]);
    assert!(repos.list_followed("alice").await.expect("followed").is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn recent_images_respect_albums_and_window(pool: PgPool) {
    album(&pool, "alice", "trips").await;
    album(&pool, "alice", "private").await;
    let since = NOW - time::Duration::hours(1);
    let fresh = image(&pool, "alice", "trips", NOW, Some(3)).await;
    image(&pool, "alice", "private", NOW, None).await;
    image(&pool, "alice", "trips", since, None).await;
    let repos = PostgresRepositories::new(pool);

    let albums = repos.list_albums("alice").await.expect("albums");
    assert_eq!(albums, ["private", "trips"]);

    let recent = repos
        .recent_images("alice", &["trips".to_string()], since)
        .await
        .expect("recent images");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].image_id, fresh);

    assert_eq!(repos.image_popularity(fresh).await.expect("popularity"), 3);
    assert_eq!(
        repos.image_popularity(Uuid::new_v4()).await.expect("popularity"),
        0
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn ranking_materializes_feeds_in_relevance_order(pool: PgPool) {
    follow(&pool, "bob", "alice").await;
    follow(&pool, "bob", "carol").await;
    album(&pool, "alice", "trips").await;
    album(&pool, "carol", "food").await;

    let popular_same_hour = image(&pool, "carol", "food", datetime!(2024-05-01 12:05 UTC), Some(9)).await;
    let latest_same_hour = image(&pool, "alice", "trips", datetime!(2024-05-01 12:20 UTC), Some(1)).await;
    let previous_hour = image(&pool, "alice", "trips", datetime!(2024-05-01 11:59 UTC), Some(50)).await;
    image(&pool, "alice", "trips", datetime!(2024-04-29 08:00 UTC), Some(99)).await;

    let repos = Arc::new(PostgresRepositories::new(pool));
    let run = ranker(repos.clone(), 100).run_at(NOW).await.expect("ranking run");

    assert_eq!(run.followers, 1);
    assert_eq!(run.written, 1);
    assert_eq!(run.failed, 0);

    let feed = FeedService::new(repos).get_feed("bob").await.expect("feed");
    let ids: Vec<Uuid> = feed.iter().map(|entry| entry.image_id).collect();
    assert_eq!(ids, [popular_same_hour, latest_same_hour, previous_hour]);
    assert_eq!(
        feed.iter().map(|entry| entry.rank).collect::<Vec<_>>(),
        [0, 1, 2]
    );
    assert_eq!(feed[0].owner_id, "carol");
}

#[sqlx::test(migrations = "./migrations")]
async fn rerun_replaces_previous_feed(pool: PgPool) {
    follow(&pool, "bob", "alice").await;
    album(&pool, "alice", "trips").await;
    for minute in 0..4 {
        image(
            &pool,
            "alice",
            "trips",
            NOW - time::Duration::minutes(minute),
            None,
        )
        .await;
    }

    let repos = Arc::new(PostgresRepositories::new(pool));
    ranker(repos.clone(), 4).run_at(NOW).await.expect("first run");
    assert_eq!(repos.get_feed("bob").await.expect("feed").len(), 4);

    ranker(repos.clone(), 2).run_at(NOW).await.expect("second run");
    let feed = repos.get_feed("bob").await.expect("feed");
    assert_eq!(feed.len(), 2);
    assert_eq!(feed[0].published_at, NOW);

    repos.replace_feed("bob", &[]).await.expect("clear feed");
    assert!(repos.get_feed("bob").await.expect("feed").is_empty());
}
