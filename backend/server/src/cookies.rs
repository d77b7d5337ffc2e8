//! Cookies carried between the front end and the API.
//!
//! The session cookie is HttpOnly and holds the opaque token. `user_info` and
//! `user_preferences` are readable by front-end scripts and carry no credentials.
use axum::http::{HeaderMap, header::COOKIE};
use cookie::{
    Cookie,
    time::{Duration, OffsetDateTime},
};
use serde_json::json;

use crate::{config::Config, models::User};

pub const SESSION_COOKIE: &str = "science_roadmap_session";

pub const USER_INFO_COOKIE: &str = "user_info";

pub const PREFERENCES_COOKIE: &str = "user_preferences";

const PREFERENCES_MAX_AGE: Duration = Duration::days(365);

pub fn session_cookie(token: &str, config: &Config) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token.to_string()))
        .path("/")
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(config.cookie_same_site)
        .max_age(session_max_age(config))
        .build()
}

pub fn user_info_cookie(user: &User, config: &Config) -> Cookie<'static> {
    let value = json!({
        "username": user.username,
        "email": user.email,
    });

    Cookie::build((USER_INFO_COOKIE, value.to_string()))
        .path("/")
        .http_only(false)
        .secure(config.cookie_secure)
        .same_site(config.cookie_same_site)
        .max_age(session_max_age(config))
        .build()
}

pub fn preferences_cookie(value: String, config: &Config) -> Cookie<'static> {
    Cookie::build((PREFERENCES_COOKIE, value))
        .path("/")
        .http_only(false)
        .secure(config.cookie_secure)
        .same_site(config.cookie_same_site)
        .max_age(PREFERENCES_MAX_AGE)
        .build()
}

/// An already-expired cookie that makes the browser drop `name`.
pub fn removal(name: &'static str, config: &Config) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/")
        .secure(config.cookie_secure)
        .same_site(config.cookie_same_site)
        .max_age(Duration::ZERO)
        .expires(OffsetDateTime::UNIX_EPOCH)
        .build()
}

/// Decoded value of the first cookie called `name` across all `Cookie` headers.
pub fn read(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse_encoded(value))
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

fn session_max_age(config: &Config) -> Duration {
    Duration::seconds(i64::try_from(config.session_ttl.as_secs()).unwrap_or(i64::MAX))
}
