use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::actor;
use crate::api::response::{from_cache_header, ApiError, AppJson, AppPath, AppQuery};
use crate::storage::models::{Group, GroupDetails, NewPermission, Permission, PermissionScope};
use crate::storage::DatabaseError;
use crate::trust::AuthContext;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    #[serde(default = "default_active")]
    pub active: bool,
    pub name: String,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct UpdateGroupRequest {
    pub active: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupSearchParams {
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Deserialize)]
pub struct MemberRequest {
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub struct MembersRequest {
    pub ids: Vec<u64>,
}

/// Outcome of adding one account in a bulk membership request
#[derive(Debug, Serialize)]
pub struct MemberOutcome {
    pub added: bool,
    pub error: Option<String>,
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub struct GroupPermissionRequest {
    pub host: String,
    #[serde(default)]
    pub ssh_options: Option<String>,
    pub user: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePermissionRequest {
    #[serde(default)]
    pub ssh_options: Option<String>,
}

/// `:id` in group routes is either the numeric id or the group name
fn find_group(state: &AppState, ident: &str) -> Result<Group, ApiError> {
    let found = match ident.parse::<u64>() {
        Ok(id) => state.db.get_group(id)?,
        Err(_) => state.db.get_group_by_name(ident)?,
    };
    found.ok_or_else(|| DatabaseError::NotFound("Group").into())
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn list_groups(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<GroupSearchParams>,
) -> Result<Response, ApiError> {
    let name = params.name.as_deref().unwrap_or_default();
    let key = serde_json::json!(["groups", "list", name, params.limit, params.offset]).to_string();
    let (limit, offset) = (params.limit, params.offset);
    let db = state.db.clone();
    let page = state
        .cache
        .get_or_compute(&key, move || async move { db.search_groups(Some(name), limit, offset) })
        .await?;
    Ok((from_cache_header(page.from_cache), Json(page.value)).into_response())
}

pub async fn create_group(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppJson(req): AppJson<CreateGroupRequest>,
) -> Result<(StatusCode, Json<Group>), ApiError> {
    let group = state.db.create_group(&req.name, req.active)?;
    state.cache.flush().await;

    info!(actor = %actor(&ctx), group_id = group.id, name = %group.name, "Group created");
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn get_group(
    State(state): State<Arc<AppState>>,
    AppPath(ident): AppPath<String>,
) -> Result<Json<GroupDetails>, ApiError> {
    let group = find_group(&state, &ident)?;
    Ok(Json(state.db.get_group_details(group.id)?))
}

pub async fn update_group(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppPath(ident): AppPath<String>,
    AppJson(req): AppJson<UpdateGroupRequest>,
) -> Result<Json<Group>, ApiError> {
    let group = find_group(&state, &ident)?;
    let group = state.db.set_group_active(group.id, req.active)?;
    state.cache.flush().await;

    info!(actor = %actor(&ctx), group_id = group.id, active = req.active, "Group updated");
    Ok(Json(group))
}

pub async fn delete_group(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppPath(ident): AppPath<String>,
) -> Result<StatusCode, ApiError> {
    let group = find_group(&state, &ident)?;
    state.db.delete_group(group.id)?;
    state.cache.flush().await;

    info!(actor = %actor(&ctx), group_id = group.id, name = %group.name, "Group deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_group_account(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppPath(ident): AppPath<String>,
    AppJson(req): AppJson<MemberRequest>,
) -> Result<StatusCode, ApiError> {
    let group = find_group(&state, &ident)?;
    if state.db.add_group_member(group.id, req.id)? {
        state.cache.flush().await;
        info!(actor = %actor(&ctx), group_id = group.id, account_id = req.id, "Member added");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Adds each id independently and reports what happened to every one
pub async fn add_group_accounts(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppPath(ident): AppPath<String>,
    AppJson(req): AppJson<MembersRequest>,
) -> Result<Json<Vec<MemberOutcome>>, ApiError> {
    let group = find_group(&state, &ident)?;

    let mut outcomes = Vec::with_capacity(req.ids.len());
    for id in req.ids {
        let outcome = match state.db.add_group_member(group.id, id) {
            Ok(added) => MemberOutcome {
                added,
                error: None,
                id,
            },
            Err(e @ DatabaseError::NotFound(_)) => MemberOutcome {
                added: false,
                error: Some(e.to_string()),
                id,
            },
            Err(e) => return Err(e.into()),
        };
        outcomes.push(outcome);
    }

    let added = outcomes.iter().filter(|o| o.added).count();
    if added > 0 {
        state.cache.flush().await;
    }

    info!(actor = %actor(&ctx), group_id = group.id, added, "Members added");
    Ok(Json(outcomes))
}

pub async fn remove_group_account(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppPath((ident, account_id)): AppPath<(String, u64)>,
) -> Result<StatusCode, ApiError> {
    let group = find_group(&state, &ident)?;
    if !state.db.remove_group_member(group.id, account_id)? {
        return Err(ApiError::not_found("Account was not in this group"));
    }
    state.cache.flush().await;

    info!(actor = %actor(&ctx), group_id = group.id, account_id, "Member removed");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_group_permission(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppPath(ident): AppPath<String>,
    AppJson(req): AppJson<GroupPermissionRequest>,
) -> Result<(StatusCode, Json<Permission>), ApiError> {
    let group = find_group(&state, &ident)?;
    let permission = state.db.create_permission(&NewPermission {
        host: req.host,
        scope: PermissionScope::Group(group.id),
        ssh_options: req.ssh_options,
        user: req.user,
    })?;
    state.cache.flush().await;

    info!(
        actor = %actor(&ctx),
        group_id = group.id,
        user = %permission.user,
        host = %permission.host,
        "Group permission granted"
    );
    Ok((StatusCode::CREATED, Json(permission)))
}

pub async fn update_group_permission(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppPath((ident, permission_id)): AppPath<(String, u64)>,
    AppJson(req): AppJson<UpdatePermissionRequest>,
) -> Result<Json<Permission>, ApiError> {
    let group = find_group(&state, &ident)?;
    let permission = state.db.update_permission_options(
        PermissionScope::Group(group.id),
        permission_id,
        req.ssh_options.as_deref(),
    )?;
    state.cache.flush().await;

    info!(actor = %actor(&ctx), group_id = group.id, permission_id, "Group permission updated");
    Ok(Json(permission))
}

pub async fn delete_group_permission(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    AppPath((ident, permission_id)): AppPath<(String, u64)>,
) -> Result<StatusCode, ApiError> {
    let group = find_group(&state, &ident)?;
    state
        .db
        .delete_permission(PermissionScope::Group(group.id), permission_id)?;
    state.cache.flush().await;

    info!(actor = %actor(&ctx), group_id = group.id, permission_id, "Group permission revoked");
    Ok(StatusCode::NO_CONTENT)
}
