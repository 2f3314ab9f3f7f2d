use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub cache: String,
    pub cluster_mode: String,
    pub node_id: String,
    pub status: String,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        cache: state.cache.backend_name().to_string(),
        cluster_mode: state.cluster.mode().as_str().to_string(),
        node_id: state.config.node.id.clone(),
        status: "healthy".to_string(),
    })
}
