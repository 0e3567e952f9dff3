use async_trait::async_trait;

use crate::application::repos::{RepoError, SocialGraphRepo};

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl SocialGraphRepo for PostgresRepositories {
    async fn list_followers(&self) -> Result<Vec<String>, RepoError> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT follower_id
            FROM user_follows
            ORDER BY follower_id
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn list_followed(&self, follower_id: &str) -> Result<Vec<String>, RepoError> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT followed_id
            FROM user_follows
            WHERE follower_id = $1
            ORDER BY followed_id
            "#,
        )
        .bind(follower_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }
}
