//! Request identity policies.
//!
//! [`MaybeUser`] attaches whoever the session cookie resolves to and never rejects.
//! [`AuthUser`] rejects with 401 before the handler body runs.
use std::{convert::Infallible, sync::Arc};

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{
    cookies::{self, SESSION_COOKIE},
    error::AppError,
    identity,
    models::User,
    state::AppState,
};

pub struct MaybeUser(pub Option<User>);

pub struct AuthUser(pub User);

async fn current_user(parts: &Parts, state: &AppState) -> Option<User> {
    let token = cookies::read(&parts.headers, SESSION_COOKIE)?;

    identity::resolve(&state.pool, &token).await
}

impl FromRequestParts<Arc<AppState>> for MaybeUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(current_user(parts, state).await))
    }
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        current_user(parts, state)
            .await
            .map(Self)
            .ok_or(AppError::Unauthenticated)
    }
}
