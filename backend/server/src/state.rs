use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use super::{
    config::Config,
    database::init_pool,
    forum::{DEFAULT_CATEGORIES, seed_categories},
    limiter::Limiters,
};

pub struct AppState {
    pub config: Config,
    pub pool: SqlitePool,
    pub limiters: Limiters,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let pool = init_pool(&config.database_url, config.max_connections).await?;

        if config.seed_categories {
            seed_categories(&pool, &DEFAULT_CATEGORIES).await?;
        }

        Ok(Self::with_pool(config, pool))
    }

    pub fn with_pool(config: Config, pool: SqlitePool) -> Arc<Self> {
        let limiters = Limiters::new(&config.rate_limits);

        Arc::new(Self {
            config,
            pool,
            limiters,
        })
    }
}
