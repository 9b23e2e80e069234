use sqlx::SqlitePool;

use crate::db::models::UserRow;

/// Create a user profile row. Credentials are owned by the external auth service.
pub async fn create_user(
    pool: &SqlitePool,
    id: &str,
    username: &str,
    profile_picture: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO users (id, username, profile_picture) VALUES (?, ?, ?)")
        .bind(id)
        .bind(username)
        .bind(profile_picture)
        .execute(pool)
        .await?;
    Ok(())
}

/// Get user by ID.
pub async fn get_user(pool: &SqlitePool, user_id: &str) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>(
        "SELECT id, username, profile_picture, status, last_seen_at, created_at \
         FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::{create_pool, run_migrations};

    async fn setup_db() -> SqlitePool {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let pool = setup_db().await;
        create_user(&pool, "u1", "alice", Some("https://img.example/a.png"))
            .await
            .unwrap();

        let user = get_user(&pool, "u1").await.unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.status, "offline");
        assert!(user.last_seen_at.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let pool = setup_db().await;
        create_user(&pool, "u1", "alice", None).await.unwrap();
        assert!(create_user(&pool, "u2", "alice", None).await.is_err());
    }

    #[tokio::test]
    async fn test_get_nonexistent_user() {
        let pool = setup_db().await;
        assert!(get_user(&pool, "nosuch").await.unwrap().is_none());
    }
}
