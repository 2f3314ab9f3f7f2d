//! Request authentication and trust-tier gates.
//!
//! [`authenticate`] runs on every route and attaches an [`AuthContext`]. The
//! `require_*` gates are layered on route groups and reject anything below
//! their tier with the fixed 401 body.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use super::response::ApiError;
use crate::trust::{AuthContext, TrustTier};
use crate::AppState;

const ON_BEHALF_OF: &str = "x-on-behalf-of";

/// Classify the bearer token and redact it from the request
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();
    let has_authorization = headers.contains_key(AUTHORIZATION);
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let on_behalf_of = headers
        .get(ON_BEHALF_OF)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let context = state
        .trust
        .authenticate(authorization.as_deref(), on_behalf_of.as_deref())
        .await;

    if has_authorization && !state.config.auth.debug_auth {
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer [***]"));
    }

    request.extensions_mut().insert(context);
    next.run(request).await
}

async fn gate(minimum: TrustTier, request: Request, next: Next) -> Response {
    let allowed = request
        .extensions()
        .get::<AuthContext>()
        .is_some_and(|ctx| ctx.is_at_least(minimum));
    if !allowed {
        return ApiError::unauthorized().into_response();
    }
    next.run(request).await
}

/// Any recognised token
pub async fn require_auth(request: Request, next: Next) -> Response {
    gate(TrustTier::Client, request, next).await
}

pub async fn require_admin(request: Request, next: Next) -> Response {
    gate(TrustTier::Admin, request, next).await
}

pub async fn require_core(request: Request, next: Next) -> Response {
    gate(TrustTier::Core, request, next).await
}
