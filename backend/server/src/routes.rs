use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{AppendHeaders, IntoResponse},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    access::{AuthUser, MaybeUser},
    cookies::{self, PREFERENCES_COOKIE, SESSION_COOKIE, USER_INFO_COOKIE},
    database::ping,
    error::AppError,
    forum::{self, Paging, PostFilter},
    identity,
    preferences::{Preferences, PreferencesUpdate},
    progress,
    state::AppState,
    utils::{Id, Params, Payload, total_pages},
};

#[derive(Deserialize)]
pub struct LoginBody {
    username: Option<String>,
    email: Option<String>,
}

#[derive(Deserialize)]
pub struct PostsQuery {
    category: Option<String>,
    search: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPostBody {
    title: Option<String>,
    content: Option<String>,
    category_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct NewReplyBody {
    content: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressBody {
    course_id: Option<Value>,
    completed: Option<bool>,
}

pub async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "message": "Science Roadmap API is active",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn health_handler(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
) -> impl IntoResponse {
    let database = if ping(&state.pool).await { "up" } else { "down" };

    Json(json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339(),
        "session_active": user.is_some(),
        "database": database,
    }))
}

pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Payload(body): Payload<LoginBody>,
) -> Result<impl IntoResponse, AppError> {
    let session = identity::login(
        &state.pool,
        body.username.as_deref(),
        body.email.as_deref(),
        state.config.session_ttl,
    )
    .await?;

    let set_cookies = AppendHeaders([
        (
            SET_COOKIE,
            cookies::session_cookie(&session.token, &state.config)
                .encoded()
                .to_string(),
        ),
        (
            SET_COOKIE,
            cookies::user_info_cookie(&session.user, &state.config)
                .encoded()
                .to_string(),
        ),
    ]);

    Ok((
        set_cookies,
        Json(json!({
            "success": true,
            "user": session.user,
            "message": "Logged in successfully",
        })),
    ))
}

pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = cookies::read(&headers, SESSION_COOKIE);
    identity::logout(&state.pool, token.as_deref()).await?;

    let clear_cookies = AppendHeaders([
        (
            SET_COOKIE,
            cookies::removal(SESSION_COOKIE, &state.config)
                .encoded()
                .to_string(),
        ),
        (
            SET_COOKIE,
            cookies::removal(USER_INFO_COOKIE, &state.config)
                .encoded()
                .to_string(),
        ),
    ]);

    Ok((
        clear_cookies,
        Json(json!({ "success": true, "message": "Logged out" })),
    ))
}

pub async fn me_handler(MaybeUser(user): MaybeUser) -> impl IntoResponse {
    let authenticated = user.is_some();

    Json(json!({ "user": user, "authenticated": authenticated }))
}

pub async fn categories_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(forum::list_categories(&state.pool).await?))
}

pub async fn list_posts_handler(
    State(state): State<Arc<AppState>>,
    Params(query): Params<PostsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = PostFilter::new(query.category.as_deref(), query.search.as_deref());
    let paging = Paging::new(query.page, query.limit);

    let (posts, total) = forum::list_posts(&state.pool, &filter, paging).await?;

    Ok(Json(json!({
        "posts": posts,
        "pagination": {
            "page": paging.page,
            "limit": paging.limit,
            "total": total,
            "totalPages": total_pages(total, paging.limit),
        },
    })))
}

pub async fn post_handler(
    State(state): State<Arc<AppState>>,
    MaybeUser(viewer): MaybeUser,
    Id(post_id): Id<i64>,
) -> Result<impl IntoResponse, AppError> {
    let (post, replies) = forum::get_post(&state.pool, post_id, viewer.as_ref()).await?;

    Ok(Json(json!({ "post": post, "replies": replies })))
}

pub async fn create_post_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Payload(body): Payload<NewPostBody>,
) -> Result<impl IntoResponse, AppError> {
    let post = forum::create_post(
        &state.pool,
        &user,
        body.title.as_deref(),
        body.content.as_deref(),
        body.category_id,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "postId": post.id,
            "message": "Post created successfully",
        })),
    ))
}

pub async fn create_reply_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Id(post_id): Id<i64>,
    Payload(body): Payload<NewReplyBody>,
) -> Result<impl IntoResponse, AppError> {
    let reply = forum::create_reply(&state.pool, &user, post_id, body.content.as_deref()).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "replyId": reply.id,
            "message": "Reply created successfully",
        })),
    ))
}

pub async fn helpful_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Id(reply_id): Id<i64>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = forum::toggle_helpful(&state.pool, &user, reply_id).await?;

    Ok(Json(json!({
        "success": true,
        "action": outcome.action,
        "helpful_count": outcome.helpful_count,
    })))
}

pub async fn get_progress_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let progress = progress::get_progress(&state.pool, &user).await?;

    Ok(Json(json!({ "progress": progress })))
}

pub async fn set_progress_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Payload(body): Payload<ProgressBody>,
) -> Result<impl IntoResponse, AppError> {
    let course_id = progress::course_key(body.course_id.as_ref())?;
    progress::set_progress(
        &state.pool,
        &user,
        &course_id,
        body.completed.unwrap_or(false),
    )
    .await?;

    Ok(Json(json!({ "success": true, "message": "Progress updated" })))
}

pub async fn get_preferences_handler(headers: HeaderMap) -> impl IntoResponse {
    let stored = cookies::read(&headers, PREFERENCES_COOKIE);
    let preferences = Preferences::from_cookie(stored.as_deref());

    Json(json!({ "preferences": preferences }))
}

pub async fn set_preferences_handler(
    State(state): State<Arc<AppState>>,
    Payload(update): Payload<PreferencesUpdate>,
) -> impl IntoResponse {
    let preferences = Preferences::from_update(update);
    let value = json!(preferences).to_string();

    (
        AppendHeaders([(
            SET_COOKIE,
            cookies::preferences_cookie(value, &state.config)
                .encoded()
                .to_string(),
        )]),
        Json(json!({ "success": true, "preferences": preferences })),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::{
        Router,
        body::Body,
        http::{
            Method, Request,
            header::{CONTENT_TYPE, COOKIE, ORIGIN, RETRY_AFTER, X_CONTENT_TYPE_OPTIONS},
        },
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        app,
        config::Config,
        database::memory_pool,
        forum::{DEFAULT_CATEGORIES, seed_categories},
    };

    struct TestApp {
        router: Router,
        state: Arc<AppState>,
    }

    struct Exchange {
        status: StatusCode,
        headers: HeaderMap,
        body: Value,
    }

    impl TestApp {
        async fn new(overrides: &[(&str, &str)]) -> Self {
            let map: HashMap<String, String> = overrides
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            let config = Config::from_lookup(|key| map.get(key).cloned()).unwrap();

            let pool = memory_pool().await;
            seed_categories(&pool, &DEFAULT_CATEGORIES).await.unwrap();

            let state = AppState::with_pool(config, pool);

            Self {
                router: app(state.clone()),
                state,
            }
        }

        async fn send(
            &self,
            method: Method,
            uri: &str,
            cookie: Option<&str>,
            body: Option<Value>,
        ) -> Exchange {
            let mut request = Request::builder().method(method).uri(uri);

            if let Some(cookie) = cookie {
                request = request.header(COOKIE, cookie);
            }

            let request = match body {
                Some(body) => request
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string())),
                None => request.body(Body::empty()),
            }
            .unwrap();

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };

            Exchange {
                status,
                headers,
                body,
            }
        }

        /// Logs in and returns the `name=value` pair of the session cookie.
        async fn login(&self, username: Option<&str>, email: &str) -> String {
            let reply = self
                .send(
                    Method::POST,
                    "/api/auth/login",
                    None,
                    Some(json!({ "username": username, "email": email })),
                )
                .await;
            assert_eq!(reply.status, StatusCode::OK);

            set_cookie(&reply.headers, SESSION_COOKIE).unwrap()
        }

        async fn category_id(&self, name: &str) -> i64 {
            let reply = self.send(Method::GET, "/api/categories", None, None).await;

            reply.body
                .as_array()
                .unwrap()
                .iter()
                .find(|category| category["name"] == name)
                .and_then(|category| category["id"].as_i64())
                .unwrap()
        }
    }

    fn set_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
        headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find(|value| value.starts_with(&format!("{name}=")))
            .and_then(|value| value.split(';').next())
            .map(str::to_string)
    }

    #[tokio::test]
    async fn test_login_creates_then_renames_user() {
        let app = TestApp::new(&[]).await;

        let first = app
            .send(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": "a@x.com" })),
            )
            .await;
        assert_eq!(first.status, StatusCode::OK);
        assert_eq!(first.body["success"], true);
        assert_eq!(first.body["user"]["username"], "a");

        let session = first
            .headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find(|value| value.starts_with(SESSION_COOKIE))
            .unwrap()
            .to_string();
        assert!(session.contains("HttpOnly"));
        assert!(set_cookie(&first.headers, USER_INFO_COOKIE).is_some());

        let second = app
            .send(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "username": "Ada", "email": "a@x.com" })),
            )
            .await;
        assert_eq!(second.body["user"]["id"], first.body["user"]["id"]);
        assert_eq!(second.body["user"]["username"], "Ada");

        let cookie = set_cookie(&second.headers, SESSION_COOKIE).unwrap();
        let me = app
            .send(Method::GET, "/api/auth/me", Some(&cookie), None)
            .await;
        assert_eq!(me.body["authenticated"], true);
        assert_eq!(me.body["user"]["username"], "Ada");

        let anonymous = app.send(Method::GET, "/api/auth/me", None, None).await;
        assert_eq!(anonymous.status, StatusCode::OK);
        assert_eq!(anonymous.body["authenticated"], false);
        assert!(anonymous.body["user"].is_null());
    }

    #[tokio::test]
    async fn test_login_requires_email() {
        let app = TestApp::new(&[]).await;

        let reply = app
            .send(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "username": "Ada" })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["error"], "Email required");

        let reply = app.send(Method::POST, "/api/auth/login", None, None).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_forum_journey() {
        let app = TestApp::new(&[]).await;
        let ada = app.login(None, "ada@x.com").await;
        let bob = app.login(None, "bob@x.com").await;
        let physics = app.category_id("physics").await;

        let created = app
            .send(
                Method::POST,
                "/api/forum/posts",
                Some(&ada),
                Some(json!({ "title": "Gravity", "content": "Why?", "categoryId": physics })),
            )
            .await;
        assert_eq!(created.status, StatusCode::CREATED);
        let post_id = created.body["postId"].as_i64().unwrap();

        let listed = app
            .send(Method::GET, "/api/forum/posts?category=physics", None, None)
            .await;
        assert_eq!(listed.body["posts"][0]["id"], post_id);
        assert_eq!(listed.body["posts"][0]["reply_count"], 0);
        assert_eq!(listed.body["pagination"]["total"], 1);
        assert_eq!(listed.body["pagination"]["totalPages"], 1);

        let replied = app
            .send(
                Method::POST,
                &format!("/api/forum/posts/{post_id}/replies"),
                Some(&bob),
                Some(json!({ "content": "Mass bends spacetime" })),
            )
            .await;
        assert_eq!(replied.status, StatusCode::CREATED);
        let reply_id = replied.body["replyId"].as_i64().unwrap();

        let listed = app
            .send(Method::GET, "/api/forum/posts?category=physics", None, None)
            .await;
        assert_eq!(listed.body["posts"][0]["reply_count"], 1);

        let helpful = format!("/api/forum/replies/{reply_id}/helpful");
        let added = app.send(Method::POST, &helpful, Some(&ada), None).await;
        assert_eq!(added.body["action"], "added");
        assert_eq!(added.body["helpful_count"], 1);

        let detail = app
            .send(
                Method::GET,
                &format!("/api/forum/posts/{post_id}"),
                Some(&ada),
                None,
            )
            .await;
        assert_eq!(detail.body["post"]["views"], 1);
        assert_eq!(detail.body["replies"][0]["marked_helpful_by_user"], true);

        let removed = app.send(Method::POST, &helpful, Some(&ada), None).await;
        assert_eq!(removed.body["action"], "removed");
        assert_eq!(removed.body["helpful_count"], 0);
    }

    #[tokio::test]
    async fn test_writes_require_identity() {
        let app = TestApp::new(&[]).await;
        let physics = app.category_id("physics").await;

        let reply = app
            .send(
                Method::POST,
                "/api/forum/posts",
                None,
                Some(json!({ "title": "Hi", "content": "there", "categoryId": physics })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.body["error"], "Authentication required");

        let posts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM forum_posts")
            .fetch_one(&app.state.pool)
            .await
            .unwrap();
        assert_eq!(posts, 0);

        let reply = app
            .send(Method::POST, "/api/forum/replies/1/helpful", None, None)
            .await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

        let reply = app
            .send(
                Method::POST,
                "/api/forum/posts/1/replies",
                Some("science_roadmap_session=forged"),
                Some(json!({ "content": "hello" })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_and_malformed_posts() {
        let app = TestApp::new(&[]).await;

        let missing = app
            .send(Method::GET, "/api/forum/posts/999999", None, None)
            .await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert_eq!(missing.body["error"], "Post not found");

        let malformed = app
            .send(Method::GET, "/api/forum/posts/abc", None, None)
            .await;
        assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_progress_round_trip() {
        let app = TestApp::new(&[]).await;

        let anonymous = app.send(Method::GET, "/api/progress", None, None).await;
        assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

        let ada = app.login(None, "ada@x.com").await;
        for _ in 0..2 {
            let saved = app
                .send(
                    Method::POST,
                    "/api/progress",
                    Some(&ada),
                    Some(json!({ "courseId": 3, "completed": true })),
                )
                .await;
            assert_eq!(saved.status, StatusCode::OK);
            assert_eq!(saved.body["success"], true);
        }

        let missing = app
            .send(
                Method::POST,
                "/api/progress",
                Some(&ada),
                Some(json!({ "completed": true })),
            )
            .await;
        assert_eq!(missing.status, StatusCode::BAD_REQUEST);

        let progress = app
            .send(Method::GET, "/api/progress", Some(&ada), None)
            .await;
        let records = progress.body["progress"].as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["course_id"], "3");
        assert_eq!(records[0]["completed"], true);
        assert!(!records[0]["completed_at"].is_null());
    }

    #[tokio::test]
    async fn test_logout_revokes_session() {
        let app = TestApp::new(&[]).await;
        let ada = app.login(None, "ada@x.com").await;

        let out = app
            .send(Method::POST, "/api/auth/logout", Some(&ada), None)
            .await;
        assert_eq!(out.status, StatusCode::OK);
        assert_eq!(
            set_cookie(&out.headers, SESSION_COOKIE).as_deref(),
            Some("science_roadmap_session=")
        );

        let me = app.send(Method::GET, "/api/auth/me", Some(&ada), None).await;
        assert_eq!(me.body["authenticated"], false);

        let again = app.send(Method::POST, "/api/auth/logout", None, None).await;
        assert_eq!(again.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_route_is_rate_limited() {
        let app = TestApp::new(&[("RATE_LIMIT_AUTH", "2")]).await;

        app.login(None, "ada@x.com").await;
        app.login(None, "ada@x.com").await;

        let limited = app
            .send(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": "ada@x.com" })),
            )
            .await;
        assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            limited.body["error"],
            "Too many authentication attempts, please try again later."
        );
        assert!(limited.headers.contains_key(RETRY_AFTER));

        let other = app.send(Method::GET, "/api/categories", None, None).await;
        assert_eq!(other.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_global_rate_limit() {
        let app = TestApp::new(&[("RATE_LIMIT_GLOBAL", "3")]).await;

        for _ in 0..3 {
            let reply = app.send(Method::GET, "/", None, None).await;
            assert_eq!(reply.status, StatusCode::OK);
        }

        let limited = app.send(Method::GET, "/api/health", None, None).await;
        assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_health_and_security_headers() {
        let app = TestApp::new(&[]).await;

        let health = app.send(Method::GET, "/api/health", None, None).await;
        assert_eq!(health.status, StatusCode::OK);
        assert_eq!(health.body["status"], "OK");
        assert_eq!(health.body["database"], "up");
        assert_eq!(health.body["session_active"], false);
        assert_eq!(health.headers[X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(health.headers["x-frame-options"], "DENY");

        let root = app.send(Method::GET, "/", None, None).await;
        assert_eq!(root.body["message"], "Science Roadmap API is active");
    }

    #[tokio::test]
    async fn test_preferences_cookie() {
        let app = TestApp::new(&[]).await;

        let defaults = app.send(Method::GET, "/api/preferences", None, None).await;
        assert_eq!(defaults.body["preferences"]["theme"], "light");
        assert_eq!(defaults.body["preferences"]["emailUpdates"], true);

        let saved = app
            .send(
                Method::POST,
                "/api/preferences",
                None,
                Some(json!({ "theme": "dark", "notifications": false })),
            )
            .await;
        assert_eq!(saved.body["preferences"]["theme"], "dark");
        let cookie = set_cookie(&saved.headers, PREFERENCES_COOKIE).unwrap();

        let stored = app
            .send(Method::GET, "/api/preferences", Some(&cookie), None)
            .await;
        assert_eq!(stored.body["preferences"]["theme"], "dark");
        assert_eq!(stored.body["preferences"]["notifications"], false);
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_configured_origin() {
        let app = TestApp::new(&[]).await;

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/forum/posts")
            .header(ORIGIN, "http://localhost:3000")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();

        let response = app.router.clone().oneshot(request).await.unwrap();
        let headers = response.headers();

        assert_eq!(
            headers["access-control-allow-origin"],
            "http://localhost:3000"
        );
        assert_eq!(headers["access-control-allow-credentials"], "true");
    }
}
