use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{debug, error};

use crate::api::response::{from_cache_header, ApiError, AppPath, AppQuery};
use crate::authz::{audit, Policy};
use crate::keys::{render_json, render_plaintext};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct KeysQuery {
    /// Fingerprint of the key the SSH daemon is about to accept
    pub f: Option<String>,
}

/// `GET /authorized_keys/:host/:user`
pub async fn keys_for_host(
    State(state): State<Arc<AppState>>,
    AppPath((host, user)): AppPath<(String, String)>,
    AppQuery(query): AppQuery<KeysQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    serve_keys(&state, &user, &host, query.f.as_deref(), &headers).await
}

/// `GET /authorized_keys/:user`, host taken from the caller's address
pub async fn keys_for_peer(
    State(state): State<Arc<AppState>>,
    AppPath(user): AppPath<String>,
    AppQuery(query): AppQuery<KeysQuery>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let (label, ip) = match forwarded {
        Some(raw) => (raw.to_string(), raw.parse::<IpAddr>().ok()),
        None => match peer {
            Some(ConnectInfo(addr)) => (addr.ip().to_string(), Some(addr.ip())),
            None => ("unknown".to_string(), None),
        },
    };

    let unresolvable = || ApiError::bad_request(format!("Unable to get hostname for {label}"));
    let ip = ip.ok_or_else(unresolvable)?;
    let host = match state.dns.reverse(ip).await {
        Ok(names) => names.into_iter().next().ok_or_else(unresolvable)?,
        Err(e) => {
            debug!(ip = %ip, error = %e, "Reverse lookup failed");
            return Err(unresolvable());
        }
    };

    serve_keys(&state, &user, &host, query.f.as_deref(), &headers).await
}

async fn serve_keys(
    state: &AppState,
    user: &str,
    host: &str,
    fingerprint: Option<&str>,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let wants_json = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));

    if !wants_json && state.config.force_signed_key {
        return Err(ApiError::not_acceptable(
            "Not Acceptable when FORCE_SIGNED_KEY is true",
        ));
    }

    let policy = Policy {
        signed_only: state.config.force_signed_key,
    };
    let resolution = match state.resolver.resolve(user, host, policy).await {
        Ok(r) => r,
        Err(e) => {
            if state.config.test_mode {
                error!(user = %user, host = %host, error = %e, "Failed authorized_keys");
            }
            return Err(e.into());
        }
    };

    if let Some(f) = fingerprint.filter(|f| !f.is_empty()) {
        audit::check_fingerprint(state.audit.clone(), user, host, f, &resolution.keys);
    }

    let cache_header = from_cache_header(resolution.from_cache);
    if wants_json {
        return Ok((cache_header, Json(render_json(&resolution.keys))).into_response());
    }

    Ok((
        cache_header,
        [(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))],
        render_plaintext(&resolution.keys),
    )
        .into_response())
}
