use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{FeedsRepo, RepoError},
    domain::entities::FeedEntry,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct FeedRow {
    user_id: String,
    rank: i32,
    image_id: Uuid,
    owner_id: String,
    published_at: OffsetDateTime,
}

impl TryFrom<FeedRow> for FeedEntry {
    type Error = RepoError;

    fn try_from(row: FeedRow) -> Result<Self, Self::Error> {
        let rank = u16::try_from(row.rank).map_err(|_| RepoError::Integrity {
            message: format!("feed rank {} out of range for `{}`", row.rank, row.user_id),
        })?;
        Ok(Self {
            user_id: row.user_id,
            rank,
            image_id: row.image_id,
            owner_id: row.owner_id,
            published_at: row.published_at,
        })
    }
}

#[async_trait]
impl FeedsRepo for PostgresRepositories {
    async fn replace_feed(&self, user_id: &str, entries: &[FeedEntry]) -> Result<(), RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("DELETE FROM user_feeds WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        if !entries.is_empty() {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO user_feeds (user_id, rank, image_id, owner_id, published_at) ",
            );
            qb.push_values(entries, |mut row, entry| {
                row.push_bind(user_id)
                    .push_bind(i32::from(entry.rank))
                    .push_bind(entry.image_id)
                    .push_bind(entry.owner_id.as_str())
                    .push_bind(entry.published_at);
            });
            qb.build()
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn get_feed(&self, user_id: &str) -> Result<Vec<FeedEntry>, RepoError> {
        let rows = sqlx::query_as::<_, FeedRow>(
            r#"
            SELECT user_id, rank, image_id, owner_id, published_at
            FROM user_feeds
            WHERE user_id = $1
            ORDER BY rank
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(FeedEntry::try_from).collect()
    }
}
