//! # Seeding
//!
//! Maintenance tasks run against the same SQLite file as the API, without starting the server.
//!
//! - `migrate`: apply the embedded schema
//! - `categories`: upsert the default forum categories by name, plus any `--name` extras
//! - `check`: print the stored categories in id order
//!
//! Category names are sanitized before they are written so the forum's exact-name filter matches
//! what the front end sends. Extras that sanitize to nothing, or to a name already present, are
//! skipped.
use anyhow::Result;
use server::{
    database::init_pool,
    forum::{DEFAULT_CATEGORIES, list_categories, seed_categories},
    models::NewCategory,
};

pub mod utils;

use utils::sanitize;

pub async fn migrate(database_url: &str) -> Result<()> {
    let pool = init_pool(database_url, 1).await?;
    pool.close().await;

    println!("Schema is up to date");

    Ok(())
}

const EXTRA_ICON: &str = "💬";
const EXTRA_DESCRIPTION: &str = "Community discussion";

/// Sanitized `(name, icon, description)` rows: the defaults first, then `extra` names in order.
pub fn category_rows(extra: &[String]) -> Vec<(String, &'static str, &'static str)> {
    let defaults = DEFAULT_CATEGORIES
        .iter()
        .map(|category| (sanitize(category.name), category.icon, category.description));
    let extras = extra
        .iter()
        .map(|name| (sanitize(name), EXTRA_ICON, EXTRA_DESCRIPTION));

    let mut rows: Vec<(String, &'static str, &'static str)> = Vec::new();
    for (name, icon, description) in defaults.chain(extras) {
        if name.is_empty() || rows.iter().any(|(existing, _, _)| *existing == name) {
            println!("Skipping category name {name:?}");
            continue;
        }
        rows.push((name, icon, description));
    }

    rows
}

pub async fn load_categories(database_url: &str, extra: &[String]) -> Result<()> {
    let pool = init_pool(database_url, 1).await?;

    let rows = category_rows(extra);
    let categories: Vec<NewCategory> = rows
        .iter()
        .map(|(name, icon, description)| NewCategory {
            name: name.as_str(),
            icon: *icon,
            description: *description,
        })
        .collect();

    for category in &categories {
        println!("Upserting: {} ({})", category.name, category.icon);
    }

    let written = seed_categories(&pool, &categories).await?;
    println!("Categories written: {written}");

    pool.close().await;

    Ok(())
}

pub async fn check_categories(database_url: &str) -> Result<()> {
    let pool = init_pool(database_url, 1).await?;

    let mut categories = list_categories(&pool).await?;
    categories.sort_by_key(|category| category.id);

    println!("Found categories: {}", categories.len());
    for category in categories {
        println!("- {}: {} ({})", category.id, category.name, category.icon);
    }

    pool.close().await;

    Ok(())
}
