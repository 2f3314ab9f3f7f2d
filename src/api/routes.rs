use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::middleware::{authenticate, require_admin, require_auth, require_core};
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Key lookups -- any client token
    let client_routes = Router::new()
        .route("/authorized_keys/:user", get(handlers::keys_for_peer))
        .route("/authorized_keys/:host/:user", get(handlers::keys_for_host))
        .route_layer(middleware::from_fn(require_auth));

    // Directory management -- admin tokens only
    let admin_routes = Router::new()
        .route(
            "/accounts",
            get(handlers::list_accounts).post(handlers::create_account),
        )
        .route("/accounts/search", get(handlers::search_accounts))
        .route(
            "/accounts/:id",
            get(handlers::get_account)
                .put(handlers::update_account)
                .delete(handlers::delete_account),
        )
        .route("/accounts/:id/keys", post(handlers::add_account_keys))
        .route(
            "/accounts/:id/keys/import/:service",
            post(handlers::import_account_keys),
        )
        .route(
            "/accounts/:id/keys/:key_id",
            delete(handlers::delete_account_key),
        )
        .route(
            "/accounts/:id/permissions",
            post(handlers::add_account_permission),
        )
        .route(
            "/accounts/:id/permissions/:permission_id",
            delete(handlers::delete_account_permission),
        )
        .route(
            "/groups",
            get(handlers::list_groups).post(handlers::create_group),
        )
        .route(
            "/groups/:id",
            get(handlers::get_group)
                .put(handlers::update_group)
                .delete(handlers::delete_group),
        )
        .route("/groups/:id/account", post(handlers::add_group_account))
        .route("/groups/:id/accounts", post(handlers::add_group_accounts))
        .route(
            "/groups/:id/accounts/:account_id",
            delete(handlers::remove_group_account),
        )
        .route(
            "/groups/:id/permissions",
            post(handlers::add_group_permission),
        )
        .route(
            "/groups/:id/permissions/:permission_id",
            delete(handlers::delete_group_permission).put(handlers::update_group_permission),
        )
        .route_layer(middleware::from_fn(require_admin));

    // Cluster sync -- core token only
    let core_routes = Router::new()
        .route("/tokens", post(handlers::push_tokens))
        .route_layer(middleware::from_fn(require_core));

    // Internal routes -- unauthenticated
    let internal_routes = Router::new().route("/_internal/health", get(handlers::health));

    Router::new()
        .merge(client_routes)
        .merge(admin_routes)
        .merge(core_routes)
        .merge(internal_routes)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            authenticate,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
