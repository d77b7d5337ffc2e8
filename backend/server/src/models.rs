//! Rows returned by the store, shaped the way the front end consumes them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub icon: String,
    pub description: String,
}

/// Category definition used when seeding the catalog.
#[derive(Debug, Clone, Copy)]
pub struct NewCategory<'a> {
    pub name: &'a str,
    pub icon: &'a str,
    pub description: &'a str,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub category_id: i64,
    pub title: String,
    pub content: String,
    pub views: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A post as it appears in the listing, enriched with author, category and reply count.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PostSummary {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub views: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: Option<String>,
    pub author_id: i64,
    pub category_id: i64,
    pub category_name: Option<String>,
    pub category_icon: Option<String>,
    pub reply_count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PostDetail {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub views: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: Option<String>,
    pub author_id: i64,
    pub category_id: i64,
    pub category_name: Option<String>,
    pub category_icon: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Reply {
    pub id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub content: String,
    pub helpful_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reply on the post detail page, annotated for the current viewer.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ReplyView {
    pub id: i64,
    pub content: String,
    pub helpful_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: Option<String>,
    pub author_id: i64,
    pub marked_helpful_by_user: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProgressRecord {
    pub course_id: String,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}
