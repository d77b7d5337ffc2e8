//! Per-user course completion, keyed by `(user_id, course_id)`.
//!
//! Course ids come from the static catalog on the front end and are stored as opaque text.
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::info;

use crate::{
    error::AppError,
    models::{ProgressRecord, User},
};

pub async fn get_progress(pool: &SqlitePool, user: &User) -> Result<Vec<ProgressRecord>, AppError> {
    let progress = sqlx::query_as(
        "SELECT course_id, completed, completed_at FROM user_progress WHERE user_id = ? ORDER BY course_id",
    )
    .bind(user.id)
    .fetch_all(pool)
    .await?;

    Ok(progress)
}

/// Inserts or overwrites the record; `completed_at` is set exactly when `completed` is true.
pub async fn set_progress(
    pool: &SqlitePool,
    user: &User,
    course_id: &str,
    completed: bool,
) -> Result<(), AppError> {
    let completed_at = completed.then(Utc::now);

    sqlx::query(
        "INSERT INTO user_progress (user_id, course_id, completed, completed_at) VALUES (?, ?, ?, ?)
         ON CONFLICT (user_id, course_id)
         DO UPDATE SET completed = excluded.completed, completed_at = excluded.completed_at",
    )
    .bind(user.id)
    .bind(course_id)
    .bind(completed)
    .bind(completed_at)
    .execute(pool)
    .await?;

    info!(user_id = user.id, course_id, completed, "Progress updated");

    Ok(())
}

/// Accepts a JSON string or number as a course id.
pub fn course_key(value: Option<&Value>) -> Result<String, AppError> {
    let key = match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    if key.is_empty() {
        return Err(AppError::validation("courseId required"));
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{database::memory_pool, identity};

    async fn user(pool: &SqlitePool, email: &str) -> User {
        identity::login(pool, None, Some(email), std::time::Duration::from_secs(60))
            .await
            .unwrap()
            .user
    }

    #[tokio::test]
    async fn test_set_progress_is_idempotent() {
        let pool = memory_pool().await;
        let ada = user(&pool, "ada@x.com").await;

        set_progress(&pool, &ada, "7", true).await.unwrap();
        set_progress(&pool, &ada, "7", true).await.unwrap();

        let progress = get_progress(&pool, &ada).await.unwrap();
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].course_id, "7");
        assert!(progress[0].completed);
        assert!(progress[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_uncompleting_clears_timestamp() {
        let pool = memory_pool().await;
        let ada = user(&pool, "ada@x.com").await;

        set_progress(&pool, &ada, "chem-101", true).await.unwrap();
        set_progress(&pool, &ada, "chem-101", false).await.unwrap();

        let progress = get_progress(&pool, &ada).await.unwrap();
        assert_eq!(progress.len(), 1);
        assert!(!progress[0].completed);
        assert!(progress[0].completed_at.is_none());
    }

    #[tokio::test]
    async fn test_progress_is_per_user() {
        let pool = memory_pool().await;
        let ada = user(&pool, "ada@x.com").await;
        let bob = user(&pool, "bob@x.com").await;

        set_progress(&pool, &ada, "1", true).await.unwrap();
        set_progress(&pool, &ada, "2", false).await.unwrap();

        assert_eq!(get_progress(&pool, &ada).await.unwrap().len(), 2);
        assert!(get_progress(&pool, &bob).await.unwrap().is_empty());
    }

    #[test]
    fn test_course_key() {
        assert_eq!(course_key(Some(&json!("bio-1"))).unwrap(), "bio-1");
        assert_eq!(course_key(Some(&json!(12))).unwrap(), "12");
        assert!(course_key(Some(&json!("  "))).is_err());
        assert!(course_key(Some(&json!(null))).is_err());
        assert!(course_key(None).is_err());
    }
}
