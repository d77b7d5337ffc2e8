//! Backend of the Science Roadmap learning platform.
//!
//! The front end (course catalog, diagnostic quiz, forum views) is a separate app that calls this
//! API with credentials attached. This crate owns identity, the forum, course progress and
//! request throttling.
//!
//!
//!
//! # Request Flow
//! - Trace and security header layers wrap every response
//! - CORS answers preflights for the configured origins before anything is counted
//! - Global rate limit per client address, then the route class limit (auth, forum writes)
//! - Identity is resolved from the `science_roadmap_session` cookie by the handler's extractor
//! - Handlers run a short sequence of SQLite statements and return JSON
//!
//!
//!
//! # Identity
//!
//! **Trust model**: whoever knows an email can log in as that user. There is no password and no
//! proof of possession. This is deliberate for the platform's audience and must not be mistaken
//! for real authentication.
//!
//! - Login upserts the user by email and issues a random session token stored in `sessions`
//! - The token travels in an HttpOnly cookie; `user_info` mirrors the public profile for scripts
//! - Logout deletes the session row and clears both cookies, even when no session existed
//!
//!
//!
//! # Notes
//!
//! ## SQLite
//! The store is a single SQLite file. Writers are serialized by SQLite itself, so every
//! multi-statement write starts with a write statement and relies on `busy_timeout` to queue.
//! Nothing holds a transaction across requests.
//!
//! ## Rate limits
//! Counters live in process memory. Running several instances multiplies the effective limit,
//! which is acceptable for this deployment.
//!
//!
//!
//! # Setup
//!
//! Run the API with defaults (port 5000, `science_roadmap.db` in the working directory).
//! ```sh
//! cargo run -p roadmap
//! ```
//!
//! Apply the schema and categories without starting the server.
//! ```sh
//! cargo run -p seed -- categories --name "Astro_Physics"
//! ```
//!
//! Drive the main user journey against a running server.
//! ```sh
//! cargo run -p tester -- --base-url http://localhost:5000
//! ```
//!
//! Generate docs in `target/doc/server/index.html`.
//! ```sh
//! cargo doc
//! ```
use std::{future::pending, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS},
    },
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tokio::{net::TcpListener, signal::ctrl_c};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod access;
pub mod config;
pub mod cookies;
pub mod database;
pub mod error;
pub mod forum;
pub mod identity;
pub mod limiter;
pub mod models;
pub mod preferences;
pub mod progress;
pub mod routes;
pub mod state;
pub mod utils;

use config::Config;
use limiter::{RouteClass, enforce};
use routes::{
    categories_handler, create_post_handler, create_reply_handler, get_preferences_handler,
    get_progress_handler, health_handler, helpful_handler, list_posts_handler, login_handler,
    logout_handler, me_handler, post_handler, root_handler, set_preferences_handler,
    set_progress_handler,
};
use state::AppState;

pub async fn start_server() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = AppState::new(config).await?;

    info!("Starting server...");
    let address = format!("0.0.0.0:{}", state.config.port);
    let app = app(state);

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shut down");

    Ok(())
}

pub fn app(state: Arc<AppState>) -> Router {
    let auth_limit = from_fn_with_state((state.clone(), RouteClass::Auth), enforce);
    let forum_limit = from_fn_with_state((state.clone(), RouteClass::ForumWrite), enforce);
    let global_limit = from_fn_with_state((state.clone(), RouteClass::Global), enforce);

    let cors = cors_layer(&state.config);

    Router::new()
        .route("/", get(root_handler))
        .route("/api/health", get(health_handler))
        .route("/api/auth/login", post(login_handler).layer(auth_limit))
        .route("/api/auth/logout", post(logout_handler))
        .route("/api/auth/me", get(me_handler))
        .route("/api/categories", get(categories_handler))
        .route(
            "/api/forum/posts",
            post(create_post_handler)
                .layer(forum_limit.clone())
                .get(list_posts_handler),
        )
        .route("/api/forum/posts/{id}", get(post_handler))
        .route(
            "/api/forum/posts/{id}/replies",
            post(create_reply_handler).layer(forum_limit),
        )
        .route("/api/forum/replies/{id}/helpful", post(helpful_handler))
        .route(
            "/api/progress",
            get(get_progress_handler).post(set_progress_handler),
        )
        .route(
            "/api/preferences",
            get(get_preferences_handler).post(set_preferences_handler),
        )
        .layer(global_limit)
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Skipping invalid CORS origin {origin}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
