//! # SQLite
//!
//! Relational store behind every forum, progress and identity operation.
//!
//! ## Requirements
//!
//! - Referential integrity between users, posts, replies and marks
//! - Unique `(reply_id, user_id)` marks and `(user_id, course_id)` progress rows
//! - Short, self-contained operations: a handler never holds a connection across requests
//!
//! ## Implementation
//!
//! - Bounded pool, one connection checked out per statement or transaction
//! - Transactions roll back when dropped, so every early return releases cleanly
//! - Writers are serialized by SQLite; `busy_timeout` lets a waiting writer queue instead of failing
//! - Schema lives in `migrations/` and is embedded into the binary
use std::{str::FromStr, time::Duration};

use sqlx::{
    SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::info;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn init_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(3))
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    info!("Database migrated, pool size {max_connections}");

    Ok(pool)
}

pub async fn ping(pool: &SqlitePool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

/// Single-connection in-memory database; the connection is pinned so the data outlives each query.
#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();

    MIGRATOR.run(&pool).await.unwrap();

    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_create_schema() {
        let pool = memory_pool().await;

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '\\_%' ESCAPE '\\' AND name != 'sqlite_sequence' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        assert_eq!(
            tables,
            vec![
                "categories",
                "forum_posts",
                "forum_replies",
                "helpful_marks",
                "sessions",
                "user_progress",
                "users",
            ]
        );
        assert!(ping(&pool).await);
    }

    #[tokio::test]
    async fn test_file_pool_is_reusable() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("roadmap.db").display());

        let pool = init_pool(&url, 2).await.unwrap();
        sqlx::query("INSERT INTO categories (name) VALUES ('physics')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let pool = init_pool(&url, 2).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
