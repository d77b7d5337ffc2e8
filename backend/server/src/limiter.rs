//! # Rate limiting
//!
//! In-process sliding window per client address, one limiter per route class:
//!
//! - **Global**: every request
//! - **Auth**: login attempts
//! - **ForumWrite**: new posts and replies
//!
//! State is local to the process; several instances each keep their own counters.
//!
//! ## Memory
//!
//! - Every `cleanup_interval` requests, addresses with no request inside the window are dropped
//! - New addresses beyond `max_tracked_ips` force a cleanup, then are rejected if still over
//! - The limit is enforced by reserving a slot while the new address's entry is locked, so
//!   concurrent first requests cannot overshoot it
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, warn};

use crate::{config::RateLimits, error::AppError, state::AppState};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub cleanup_interval: u64,
    pub max_tracked_ips: usize,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            cleanup_interval: 100,
            max_tracked_ips: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exceeded {
    pub retry_after: Duration,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    state: DashMap<IpAddr, Vec<Instant>>,
    request_count: AtomicU64,
    tracked: AtomicUsize,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: DashMap::new(),
            request_count: AtomicU64::new(0),
            tracked: AtomicUsize::new(0),
        }
    }

    /// Records a request from `ip`, or reports how long until the window frees a slot.
    pub fn check(&self, ip: IpAddr) -> Result<(), Exceeded> {
        let now = Instant::now();
        let window = self.config.window;
        let cutoff = now.checked_sub(window);

        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        if count > 0 && count % self.config.cleanup_interval == 0 {
            debug!(request_count = count, "Running periodic rate limiter cleanup");
            self.cleanup();
        }

        if !self.state.contains_key(&ip) && self.tracked_ips() >= self.config.max_tracked_ips {
            self.cleanup();
        }

        // final check under the shard lock
        let mut timestamps = match self.state.entry(ip) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => {
                if !self.reserve_slot() {
                    warn!(
                        ip = %ip,
                        max_tracked_ips = self.config.max_tracked_ips,
                        "Rejecting new address: tracked address limit reached"
                    );
                    return Err(Exceeded {
                        retry_after: window,
                    });
                }
                entry.insert(Vec::new())
            }
        };
        timestamps.retain(|&t| cutoff.is_none_or(|cutoff| t > cutoff));

        if timestamps.len() >= self.config.max_requests as usize {
            let retry_after = timestamps
                .first()
                .map_or(window, |&oldest| (oldest + window).saturating_duration_since(now));

            warn!(
                ip = %ip,
                requests = timestamps.len(),
                max = self.config.max_requests,
                "Rate limit exceeded"
            );
            return Err(Exceeded { retry_after });
        }

        timestamps.push(now);

        Ok(())
    }

    pub fn cleanup(&self) {
        let Some(cutoff) = Instant::now().checked_sub(self.config.window) else {
            return;
        };

        let mut removed = 0;
        self.state.retain(|_, timestamps| {
            timestamps.retain(|&t| t > cutoff);
            let keep = !timestamps.is_empty();
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            self.tracked.fetch_sub(removed, Ordering::SeqCst);
            debug!(removed, "Dropped idle addresses");
        }
    }

    pub fn tracked_ips(&self) -> usize {
        self.tracked.load(Ordering::SeqCst)
    }

    fn reserve_slot(&self) -> bool {
        let max = self.config.max_tracked_ips;
        self.tracked
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Global,
    Auth,
    ForumWrite,
}

impl RouteClass {
    pub const fn message(self) -> &'static str {
        match self {
            Self::Global => "Too many requests, please try again later.",
            Self::Auth => "Too many authentication attempts, please try again later.",
            Self::ForumWrite => "Too many forum interactions, please try again later.",
        }
    }
}

pub struct Limiters {
    global: RateLimiter,
    auth: RateLimiter,
    forum: RateLimiter,
}

impl Limiters {
    pub fn new(limits: &RateLimits) -> Self {
        Self {
            global: RateLimiter::new(RateLimitConfig::new(limits.global, limits.window)),
            auth: RateLimiter::new(RateLimitConfig::new(limits.auth, limits.window)),
            forum: RateLimiter::new(RateLimitConfig::new(limits.forum, limits.window)),
        }
    }

    pub fn get(&self, class: RouteClass) -> &RateLimiter {
        match class {
            RouteClass::Global => &self.global,
            RouteClass::Auth => &self.auth,
            RouteClass::ForumWrite => &self.forum,
        }
    }
}

/// Middleware applied per route class with `from_fn_with_state((state, class), enforce)`.
pub async fn enforce(
    State((state, class)): State<(Arc<AppState>, RouteClass)>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = client_ip(&request, state.config.trust_proxy);

    state
        .limiters
        .get(class)
        .check(ip)
        .map_err(|exceeded| AppError::RateLimited {
            message: class.message(),
            retry_after_secs: exceeded.retry_after.as_secs().max(1),
        })?;

    Ok(next.run(request).await)
}

pub fn client_ip(request: &Request, trust_proxy: bool) -> IpAddr {
    if trust_proxy {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|value| value.trim().parse().ok());

        if let Some(ip) = forwarded {
            return ip;
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |ConnectInfo(addr)| {
            addr.ip()
        })
}
