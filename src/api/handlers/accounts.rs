use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use tracing::{info, warn};

use super::{actor, PaginationParams};
use crate::api::response::{from_cache_header, ApiError, AppJson, AppPath, AppQuery};
use crate::keys::{parse_public_key, KeyFormatError};
use crate::storage::models::{
    AccountDetails, NewAccount, NewPermission, NewPublicKey, Permission, PermissionScope,
    PublicKey,
};
use crate::storage::DatabaseError;
use crate::trust::AuthContext;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAccountRequest {
    pub active: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Deserialize)]
pub struct KeyInput {
    #[serde(default)]
    pub fingerprint: Option<String>,
    pub public_key: String,
    #[serde(default)]
    pub public_key_sig: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddKeysRequest {
    pub keys: Vec<KeyInput>,
}

#[derive(Debug, Deserialize)]
pub struct ImportKeysRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct PermissionRequest {
    pub host: String,
    #[serde(default)]
    pub ssh_options: Option<String>,
    pub user: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<PaginationParams>,
) -> Result<Response, ApiError> {
    let key = serde_json::json!(["accounts", "list", params.limit, params.offset]).to_string();
    let db = state.db.clone();
    let page = state
        .cache
        .get_or_compute(&key, move || async move {
            db.list_accounts(params.limit, params.offset)
        })
        .await?;
    Ok((from_cache_header(page.from_cache), Json(page.value)).into_response())
}

pub async fn search_accounts(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<SearchParams>,
) -> Result<Response, ApiError> {
    let name = params.name.as_deref().unwrap_or_default();
    let email = params.email.as_deref().unwrap_or_default();
    let key = serde_json::json!(["accounts", "search", name, email, params.limit, params.offset])
        .to_string();
    let (limit, offset) = (params.limit, params.offset);
    let db = state.db.clone();
    let page = state
        .cache
        .get_or_compute(&key, move || async move {
            db.search_accounts(Some(name), Some(email), limit, offset)
        })
        .await?;
    Ok((from_cache_header(page.from_cache), Json(page.value)).into_response())
}

pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppJson(req): AppJson<CreateAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state.db.create_account(&NewAccount {
        email: req.email,
        name: req.name,
    })?;
    state.cache.flush().await;

    info!(actor = %actor(&ctx), account_id = account.id, email = %account.email, "Account created");
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn get_account(
    State(state): State<Arc<AppState>>,
    AppPath(id): AppPath<u64>,
) -> Result<Json<AccountDetails>, ApiError> {
    Ok(Json(state.db.get_account_details(id)?))
}

pub async fn update_account(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppPath(id): AppPath<u64>,
    AppJson(req): AppJson<UpdateAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state.db.set_account_active(id, req.active)?;
    state.cache.flush().await;

    info!(actor = %actor(&ctx), account_id = id, active = req.active, "Account updated");
    Ok(Json(account))
}

pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppPath(id): AppPath<u64>,
) -> Result<StatusCode, ApiError> {
    state.db.delete_account(id)?;
    state.cache.flush().await;

    info!(actor = %actor(&ctx), account_id = id, "Account deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Every key is validated before any is stored, so a malformed batch writes nothing.
pub async fn add_account_keys(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppPath(id): AppPath<u64>,
    AppJson(req): AppJson<AddKeysRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.keys.is_empty() {
        return Err(ApiError::bad_request("keys must not be empty"));
    }

    let parsed = req
        .keys
        .iter()
        .map(|input| {
            let key = parse_public_key(&input.public_key)?;
            key.check_fingerprint(input.fingerprint.as_deref())?;
            Ok(NewPublicKey {
                comment: key.comment,
                data: key.data,
                fingerprint: key.fingerprint,
                key_type: key.key_type,
                signature: input
                    .public_key_sig
                    .clone()
                    .filter(|s| !s.trim().is_empty()),
            })
        })
        .collect::<Result<Vec<_>, KeyFormatError>>()?;

    let mut added = Vec::with_capacity(parsed.len());
    let result = parsed
        .iter()
        .try_for_each(|new| state.db.add_public_key(id, new).map(|key| added.push(key)));
    if !added.is_empty() {
        state.cache.flush().await;
    }
    result?;

    info!(actor = %actor(&ctx), account_id = id, count = added.len(), "Keys added");
    Ok((StatusCode::CREATED, Json(added)))
}

/// Fetch a user's published keys from an external service and attach them.
/// Keys the account already has are skipped.
pub async fn import_account_keys(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppPath((id, service)): AppPath<(u64, String)>,
    AppJson(req): AppJson<ImportKeysRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim();
    if username.is_empty() || username.contains(['/', '?', '#']) {
        return Err(ApiError::bad_request("username is invalid"));
    }
    if state.db.get_account(id)?.is_none() {
        return Err(DatabaseError::NotFound("Account").into());
    }

    let base = match service.as_str() {
        "github" => state.config.integrations.key_import_github_url.trim_end_matches('/'),
        other => return Err(ApiError::bad_request(format!("Unsupported key service {other}"))),
    };
    let body = fetch_published_keys(&state.http_client, &format!("{base}/{username}.keys"))
        .await?;

    let mut imported: Vec<PublicKey> = Vec::new();
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let key = match parse_public_key(line) {
            Ok(key) => key,
            Err(e) => {
                warn!(service = %service, username = %username, error = %e, "Skipping unparseable key");
                continue;
            }
        };
        let new = NewPublicKey {
            comment: key.comment,
            data: key.data,
            fingerprint: key.fingerprint,
            key_type: key.key_type,
            signature: None,
        };
        match state.db.add_public_key(id, &new) {
            Ok(key) => imported.push(key),
            Err(DatabaseError::Conflict(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    if !imported.is_empty() {
        state.cache.flush().await;
    }

    info!(
        actor = %actor(&ctx),
        account_id = id,
        service = %service,
        username = %username,
        count = imported.len(),
        "Keys imported"
    );
    Ok((StatusCode::CREATED, Json(imported)))
}

async fn fetch_published_keys(client: &reqwest::Client, url: &str) -> Result<String, ApiError> {
    let response = client.get(url).send().await.map_err(|e| {
        warn!(url = %url, error = %e, "Key import request failed");
        ApiError::unavailable("Key service unreachable")
    })?;

    match response.status() {
        s if s.is_success() => response.text().await.map_err(|e| {
            warn!(url = %url, error = %e, "Key import body unreadable");
            ApiError::unavailable("Key service returned an unreadable body")
        }),
        reqwest::StatusCode::NOT_FOUND => Err(ApiError::not_found("User not found on key service")),
        s => {
            warn!(url = %url, status = %s, "Key import rejected");
            Err(ApiError::unavailable(format!("Key service returned {s}")))
        }
    }
}

pub async fn delete_account_key(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppPath((id, key_id)): AppPath<(u64, u64)>,
) -> Result<StatusCode, ApiError> {
    state.db.delete_public_key(id, key_id)?;
    state.cache.flush().await;

    info!(actor = %actor(&ctx), account_id = id, key_id, "Key deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_account_permission(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppPath(id): AppPath<u64>,
    AppJson(req): AppJson<PermissionRequest>,
) -> Result<(StatusCode, Json<Permission>), ApiError> {
    let permission = state.db.create_permission(&NewPermission {
        host: req.host,
        scope: PermissionScope::Account(id),
        ssh_options: req.ssh_options,
        user: req.user,
    })?;
    state.cache.flush().await;

    info!(
        actor = %actor(&ctx),
        account_id = id,
        user = %permission.user,
        host = %permission.host,
        "Account permission granted"
    );
    Ok((StatusCode::CREATED, Json(permission)))
}

pub async fn delete_account_permission(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppPath((id, permission_id)): AppPath<(u64, u64)>,
) -> Result<StatusCode, ApiError> {
    state
        .db
        .delete_permission(PermissionScope::Account(id), permission_id)?;
    state.cache.flush().await;

    info!(actor = %actor(&ctx), account_id = id, permission_id, "Account permission revoked");
    Ok(StatusCode::NO_CONTENT)
}
