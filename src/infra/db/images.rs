use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{ImagesRepo, PopularityRepo, RepoError},
    domain::entities::ImageRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct ImageRow {
    image_id: Uuid,
    owner_id: String,
    album_name: String,
    published_at: OffsetDateTime,
}

impl From<ImageRow> for ImageRecord {
    fn from(row: ImageRow) -> Self {
        Self {
            image_id: row.image_id,
            owner_id: row.owner_id,
            album_name: row.album_name,
            published_at: row.published_at,
        }
    }
}

#[async_trait]
impl ImagesRepo for PostgresRepositories {
    async fn list_albums(&self, owner_id: &str) -> Result<Vec<String>, RepoError> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT album_name
            FROM user_albums
            WHERE owner_id = $1
            ORDER BY album_name
            "#,
        )
        .bind(owner_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn recent_images(
        &self,
        owner_id: &str,
        albums: &[String],
        since: OffsetDateTime,
    ) -> Result<Vec<ImageRecord>, RepoError> {
        let rows = sqlx::query_as::<_, ImageRow>(
            r#"
            SELECT image_id, owner_id, album_name, published_at
            FROM images_by_user
            WHERE owner_id = $1
              AND album_name = ANY($2)
              AND published_at > $3
            "#,
        )
        .bind(owner_id)
        .bind(albums)
        .bind(since)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ImageRecord::from).collect())
    }
}

#[async_trait]
impl PopularityRepo for PostgresRepositories {
    async fn image_popularity(&self, image_id: Uuid) -> Result<i64, RepoError> {
        let popularity = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT popularity
            FROM image_popularity
            WHERE image_id = $1
            "#,
        )
        .bind(image_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(popularity.unwrap_or(0))
    }
}
