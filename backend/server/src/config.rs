use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use cookie::SameSite;
use thiserror::Error;
use tracing::{info, warn};

const SECRET_KEYS: [&str; 1] = ["DATABASE_URL"];

/// Ten years; longer lifetimes overflow cookie and timestamp arithmetic.
const MAX_SESSION_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

const DEFAULT_ORIGINS: &str = "http://localhost:3000,http://localhost:3001,http://localhost:3002";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct RateLimits {
    pub window: Duration,
    pub global: u32,
    pub auth: u32,
    pub forum: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    pub allowed_origins: Vec<String>,
    pub production: bool,
    pub cookie_secure: bool,
    pub cookie_same_site: SameSite,
    pub session_ttl: Duration,
    /// Take the client address from `X-Forwarded-For` when running behind a proxy.
    pub trust_proxy: bool,
    pub seed_categories: bool,
    pub rate_limits: RateLimits,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| {
            if SECRET_KEYS.contains(&key) {
                if let Some(secret) = read_secret(key) {
                    return Some(secret);
                }
            }

            var(key)
        })
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = Source { lookup };

        let production = source
            .try_load::<String>("APP_ENV", "development")?
            .eq_ignore_ascii_case("production");

        let default_same_site = if production { "none" } else { "lax" };
        let cookie_same_site = parse_same_site(
            "COOKIE_SAME_SITE",
            &source.try_load::<String>("COOKIE_SAME_SITE", default_same_site)?,
        )?;

        let mut allowed_origins: Vec<String> = source
            .try_load::<String>("ALLOWED_ORIGINS", DEFAULT_ORIGINS)?
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        if let Some(frontend) = (source.lookup)("FRONTEND_URL") {
            let frontend = frontend.trim().to_string();
            if !frontend.is_empty() && !allowed_origins.contains(&frontend) {
                allowed_origins.push(frontend);
            }
        }

        Ok(Self {
            port: source.try_load("PORT", "5000")?,
            database_url: source
                .try_load("DATABASE_URL", "sqlite://science_roadmap.db?mode=rwc")?,
            max_connections: source.try_load("DATABASE_MAX_CONNECTIONS", "5")?,
            allowed_origins,
            production,
            cookie_secure: source.try_load("COOKIE_SECURE", &production.to_string())?,
            cookie_same_site,
            session_ttl: session_ttl(source.try_load("SESSION_TTL_SECS", "604800")?)?,
            trust_proxy: source.try_load("TRUST_PROXY", "false")?,
            seed_categories: source.try_load("SEED_CATEGORIES", "true")?,
            rate_limits: RateLimits {
                window: Duration::from_secs(source.try_load("RATE_LIMIT_WINDOW_SECS", "900")?),
                global: source.try_load("RATE_LIMIT_GLOBAL", "100")?,
                auth: source.try_load("RATE_LIMIT_AUTH", "20")?,
                forum: source.try_load("RATE_LIMIT_FORUM", "30")?,
            },
        })
    }
}

struct Source<F> {
    lookup: F,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn try_load<T: FromStr>(&self, key: &'static str, default: &str) -> Result<T, ConfigError>
    where
        T::Err: Display,
    {
        (self.lookup)(key)
            .unwrap_or_else(|| {
                info!("{key} not set, using default: {default}");
                default.to_string()
            })
            .trim()
            .parse()
            .map_err(|e: T::Err| {
                warn!("Invalid {key} value: {e}");

                ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                }
            })
    }
}

fn session_ttl(secs: u64) -> Result<Duration, ConfigError> {
    if secs > MAX_SESSION_TTL_SECS {
        return Err(ConfigError::Invalid {
            key: "SESSION_TTL_SECS",
            reason: format!("at most {MAX_SESSION_TTL_SECS} seconds allowed, got {secs}"),
        });
    }

    Ok(Duration::from_secs(secs))
}

fn parse_same_site(key: &'static str, value: &str) -> Result<SameSite, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "lax" => Ok(SameSite::Lax),
        "strict" => Ok(SameSite::Strict),
        "none" => Ok(SameSite::None),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("expected lax, strict or none, got {other}"),
        }),
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            info!("Failed to read {secret_name} from file: {e}, falling back to environment");
        })
        .ok()
}
