use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Serialize;
use tracing::{info, warn};

use super::actor;
use crate::api::response::{ApiError, AppJson};
use crate::cluster::{PushOutcome, TokenPush};
use crate::trust::AuthContext;
use crate::AppState;

/// Body of a 207 response when some replicas did not accept the table
#[derive(Debug, Serialize)]
pub struct PartialPushResponse {
    pub reason: String,
    pub status: u16,
    pub targets: Vec<PushOutcome>,
}

/// `POST /tokens`: replace the token table and fan it out when running as core
pub async fn push_tokens(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppJson(push): AppJson<TokenPush>,
) -> Result<Response, ApiError> {
    let admins = push.tokens.admins.len();
    let clients = push.tokens.clients.len();
    let outcomes = state.cluster.distribute(push.tokens).await;

    info!(
        actor = %actor(&ctx),
        admins,
        clients,
        targets = outcomes.len(),
        "Token table replaced"
    );

    let failed = outcomes.iter().filter(|o| !o.ok).count();
    if failed == 0 {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    warn!(failed, "Token table not accepted by every replica");
    let status = StatusCode::MULTI_STATUS;
    Ok((
        status,
        Json(PartialPushResponse {
            reason: format!("{failed} of {} replicas did not accept the push", outcomes.len()),
            status: status.as_u16(),
            targets: outcomes,
        }),
    )
        .into_response())
}
