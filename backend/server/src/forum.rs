//! # Forum
//!
//! Categories, posts, replies and helpful marks.
//!
//! ## Consistency
//!
//! - Listing and counting share one filter builder, so `total` always matches the items' predicate
//! - Posts are ordered `created_at DESC, id DESC` and replies `created_at ASC, id ASC`; ids break ties
//! - A helpful toggle is one transaction: mark insert or delete plus the counter update
//! - Search matches a lowercased copy of title and content, so case folding covers all of Unicode
//! - The view counter is a plain `views = views + 1`, never read back before writing
use chrono::Utc;
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::{
    error::AppError,
    models::{Category, NewCategory, Post, PostDetail, PostSummary, Reply, ReplyView, User},
    utils::{like_pattern, non_blank, required_text},
};

pub const MAX_TITLE_CHARS: usize = 200;

pub const MAX_CONTENT_CHARS: usize = 20_000;

pub const DEFAULT_PAGE_SIZE: i64 = 20;

pub const MAX_PAGE_SIZE: i64 = 100;

/// Category filter value that disables category filtering.
pub const ALL_CATEGORIES: &str = "all";

pub const DEFAULT_CATEGORIES: [NewCategory<'static>; 5] = [
    NewCategory {
        name: "biology",
        icon: "🧬",
        description: "All things life science",
    },
    NewCategory {
        name: "chemistry",
        icon: "⚗️",
        description: "Reactions, elements, and compounds",
    },
    NewCategory {
        name: "physics",
        icon: "⚡",
        description: "Forces, motion, and energy",
    },
    NewCategory {
        name: "earth science",
        icon: "🌍",
        description: "Geology, meteorology, and astronomy",
    },
    NewCategory {
        name: "general discussion",
        icon: "💬",
        description: "Anything and everything science",
    },
];

const SUMMARY_SELECT: &str = "SELECT p.id, p.title, p.content, p.views, p.created_at, p.updated_at,
        u.username AS author, p.user_id AS author_id, p.category_id,
        c.name AS category_name, c.icon AS category_icon,
        (SELECT COUNT(*) FROM forum_replies r WHERE r.post_id = p.id) AS reply_count
    FROM forum_posts p
    LEFT JOIN users u ON u.id = p.user_id
    LEFT JOIN categories c ON c.id = p.category_id";

const COUNT_SELECT: &str = "SELECT COUNT(*)
    FROM forum_posts p
    LEFT JOIN categories c ON c.id = p.category_id";

#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub category: Option<String>,
    pub search: Option<String>,
}

impl PostFilter {
    /// Blank values and the `all` category are treated as no filter.
    pub fn new(category: Option<&str>, search: Option<&str>) -> Self {
        Self {
            category: non_blank(category)
                .filter(|name| *name != ALL_CATEGORIES)
                .map(str::to_string),
            search: non_blank(search).map(str::to_string),
        }
    }

    fn push_where(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        builder.push(" WHERE 1 = 1");

        if let Some(category) = &self.category {
            builder.push(" AND c.name = ").push_bind(category.clone());
        }

        if let Some(search) = &self.search {
            builder
                .push(" AND p.search_text LIKE ")
                .push_bind(like_pattern(&search.to_lowercase()))
                .push(" ESCAPE '\\'");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page: i64,
    pub limit: i64,
}

impl Paging {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HelpfulAction {
    Added,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub action: HelpfulAction,
    pub helpful_count: i64,
}

/// Upserts `categories` by name; returns how many were written.
pub async fn seed_categories(
    pool: &SqlitePool,
    categories: &[NewCategory<'_>],
) -> Result<u64, AppError> {
    let mut tx = pool.begin().await?;
    let mut written = 0;

    for category in categories {
        written += sqlx::query(
            "INSERT INTO categories (name, icon, description) VALUES (?, ?, ?)
             ON CONFLICT (name) DO UPDATE SET icon = excluded.icon, description = excluded.description",
        )
        .bind(category.name)
        .bind(category.icon)
        .bind(category.description)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }

    tx.commit().await?;
    info!("Seeded {written} categories");

    Ok(written)
}

pub async fn list_categories(pool: &SqlitePool) -> Result<Vec<Category>, AppError> {
    let categories =
        sqlx::query_as("SELECT id, name, icon, description FROM categories ORDER BY name, id")
            .fetch_all(pool)
            .await?;

    Ok(categories)
}

pub async fn list_posts(
    pool: &SqlitePool,
    filter: &PostFilter,
    paging: Paging,
) -> Result<(Vec<PostSummary>, i64), AppError> {
    let mut items = QueryBuilder::<Sqlite>::new(SUMMARY_SELECT);
    filter.push_where(&mut items);
    items
        .push(" ORDER BY p.created_at DESC, p.id DESC LIMIT ")
        .push_bind(paging.limit)
        .push(" OFFSET ")
        .push_bind(paging.offset());

    let posts = items
        .build_query_as::<PostSummary>()
        .fetch_all(pool)
        .await?;

    let mut count = QueryBuilder::<Sqlite>::new(COUNT_SELECT);
    filter.push_where(&mut count);

    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    debug!(
        returned = posts.len(),
        total,
        page = paging.page,
        "Listed forum posts"
    );

    Ok((posts, total))
}

/// Counts a view, then loads the post and its replies annotated for `viewer`.
pub async fn get_post(
    pool: &SqlitePool,
    post_id: i64,
    viewer: Option<&User>,
) -> Result<(PostDetail, Vec<ReplyView>), AppError> {
    let viewed = sqlx::query("UPDATE forum_posts SET views = views + 1 WHERE id = ?")
        .bind(post_id)
        .execute(pool)
        .await?
        .rows_affected();

    if viewed == 0 {
        return Err(AppError::NotFound("Post not found"));
    }

    let post: PostDetail = sqlx::query_as(
        "SELECT p.id, p.title, p.content, p.views, p.created_at, p.updated_at,
                u.username AS author, p.user_id AS author_id, p.category_id,
                c.name AS category_name, c.icon AS category_icon
         FROM forum_posts p
         LEFT JOIN users u ON u.id = p.user_id
         LEFT JOIN categories c ON c.id = p.category_id
         WHERE p.id = ?",
    )
    .bind(post_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Post not found"))?;

    let replies = sqlx::query_as(
        "SELECT r.id, r.content, r.helpful_count, r.created_at, r.updated_at,
                u.username AS author, r.user_id AS author_id,
                EXISTS (
                    SELECT 1 FROM helpful_marks m WHERE m.reply_id = r.id AND m.user_id = ?
                ) AS marked_helpful_by_user
         FROM forum_replies r
         LEFT JOIN users u ON u.id = r.user_id
         WHERE r.post_id = ?
         ORDER BY r.created_at ASC, r.id ASC",
    )
    .bind(viewer.map(|user| user.id))
    .bind(post_id)
    .fetch_all(pool)
    .await?;

    Ok((post, replies))
}

pub async fn create_post(
    pool: &SqlitePool,
    author: &User,
    title: Option<&str>,
    content: Option<&str>,
    category_id: Option<i64>,
) -> Result<Post, AppError> {
    let title = required_text(title, "Title", MAX_TITLE_CHARS)?;
    let content = required_text(content, "Content", MAX_CONTENT_CHARS)?;
    let category_id = category_id.ok_or_else(|| AppError::validation("Category required"))?;

    let now = Utc::now();

    let post: Post = sqlx::query_as(
        "INSERT INTO forum_posts
            (user_id, category_id, title, content, search_text, views, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, 0, ?, ?)
         RETURNING id, user_id, category_id, title, content, views, created_at, updated_at",
    )
    .bind(author.id)
    .bind(category_id)
    .bind(&title)
    .bind(&content)
    .bind(search_text(&title, &content))
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    info!(post_id = post.id, user_id = author.id, "Post created");

    Ok(post)
}

pub async fn create_reply(
    pool: &SqlitePool,
    author: &User,
    post_id: i64,
    content: Option<&str>,
) -> Result<Reply, AppError> {
    let content = required_text(content, "Content", MAX_CONTENT_CHARS)?;
    let now = Utc::now();

    let reply: Reply = sqlx::query_as(
        "INSERT INTO forum_replies (post_id, user_id, content, helpful_count, created_at, updated_at)
         VALUES (?, ?, ?, 0, ?, ?)
         RETURNING id, post_id, user_id, content, helpful_count, created_at, updated_at",
    )
    .bind(post_id)
    .bind(author.id)
    .bind(&content)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    info!(reply_id = reply.id, post_id, user_id = author.id, "Reply created");

    Ok(reply)
}

/// Lowercased title and content; SQLite's `LIKE` only folds ASCII, so matching runs on this.
fn search_text(title: &str, content: &str) -> String {
    format!("{title}\n{content}").to_lowercase()
}

/// Adds `user`'s helpful mark on the reply, or removes it if already present.
pub async fn toggle_helpful(
    pool: &SqlitePool,
    user: &User,
    reply_id: i64,
) -> Result<ToggleOutcome, AppError> {
    let mut tx = pool.begin().await?;

    // a write first, so the transaction holds the write lock before it reads anything
    let removed = sqlx::query("DELETE FROM helpful_marks WHERE reply_id = ? AND user_id = ?")
        .bind(reply_id)
        .bind(user.id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
        > 0;

    let (action, delta) = if removed {
        (HelpfulAction::Removed, -1)
    } else {
        (HelpfulAction::Added, 1)
    };

    let helpful_count: i64 = sqlx::query_scalar(
        "UPDATE forum_replies SET helpful_count = helpful_count + ? WHERE id = ? RETURNING helpful_count",
    )
    .bind(delta)
    .bind(reply_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Reply not found"))?;

    if !removed {
        sqlx::query("INSERT INTO helpful_marks (reply_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(reply_id)
            .bind(user.id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    debug!(reply_id, user_id = user.id, ?action, helpful_count, "Helpful mark toggled");

    Ok(ToggleOutcome {
        action,
        helpful_count,
    })
}
