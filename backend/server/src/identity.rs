//! # Identity
//!
//! Users are keyed by email. There is no password: knowing an email is enough to act as
//! that user, and a login with an unseen email creates the account.
//!
//! A successful login issues an opaque session token (UUID v4) stored server side with an
//! expiry. Resolution maps a token to at most one user and never fails; logout deletes the row.
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::User,
    utils::{default_username, is_valid_email, non_blank},
};

pub const MAX_USERNAME_CHARS: usize = 50;

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

pub async fn login(
    pool: &SqlitePool,
    username: Option<&str>,
    email: Option<&str>,
    ttl: Duration,
) -> Result<Session, AppError> {
    let email = non_blank(email).ok_or_else(|| AppError::validation("Email required"))?;
    if !is_valid_email(email) {
        return Err(AppError::validation("Valid email required"));
    }

    let username = non_blank(username);
    if username.is_some_and(|name| name.chars().count() > MAX_USERNAME_CHARS) {
        return Err(AppError::validation(format!(
            "Username must be at most {MAX_USERNAME_CHARS} characters"
        )));
    }

    let now = Utc::now();

    // get, create or rename in one statement so concurrent first logins cannot collide
    let user: User = sqlx::query_as(
        "INSERT INTO users (username, email, created_at) VALUES (?, ?, ?)
         ON CONFLICT (email) DO UPDATE SET username = COALESCE(?, users.username)
         RETURNING id, username, email",
    )
    .bind(username.unwrap_or_else(|| default_username(email)))
    .bind(email)
    .bind(now)
    .bind(username)
    .fetch_one(pool)
    .await?;

    let token = Uuid::new_v4().simple().to_string();
    let expires_at = session_expiry(now, ttl);

    let mut tx = pool.begin().await?;

    let purged = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    sqlx::query("INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
        .bind(&token)
        .bind(user.id)
        .bind(now)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    if purged > 0 {
        debug!(purged, "Purged expired sessions");
    }
    info!(user_id = user.id, "User logged in");

    Ok(Session {
        token,
        user,
        expires_at,
    })
}

/// `now + ttl`, or a week from now when `ttl` does not fit a timestamp.
fn session_expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    match chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
    {
        Some(expires_at) => expires_at,
        None => {
            warn!(ttl_secs = ttl.as_secs(), "Session TTL out of range, using one week");
            now + chrono::Duration::days(7)
        }
    }
}

pub async fn resolve(pool: &SqlitePool, token: &str) -> Option<User> {
    let result = sqlx::query_as::<_, User>(
        "SELECT u.id, u.username, u.email
         FROM sessions s
         JOIN users u ON u.id = s.user_id
         WHERE s.token = ? AND s.expires_at > ?",
    )
    .bind(token)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await;

    match result {
        Ok(user) => user,
        Err(e) => {
            warn!(error = %e, "Failed to resolve session, treating request as anonymous");
            None
        }
    }
}

/// Revokes `token`. Succeeds whether or not a session existed.
pub async fn logout(pool: &SqlitePool, token: Option<&str>) -> Result<(), AppError> {
    let Some(token) = token else {
        return Ok(());
    };

    let removed = sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?
        .rows_affected();

    debug!(removed, "Session revoked");

    Ok(())
}
