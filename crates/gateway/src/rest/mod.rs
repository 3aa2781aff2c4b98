//! HTTP routes that sit beside the WebSocket endpoint.

pub mod pages;

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router as AxumRouter,
};
use chrono::Utc;
use serde::Serialize;

use crate::error::{GatewayError, GatewayResult};
use crate::state::GatewayState;

pub fn create_rest_routes() -> AxumRouter<Arc<GatewayState>> {
    AxumRouter::new()
        .route("/", get(pages::index))
        .route("/health", get(health_check))
        .route("/api/username/:name/available", get(username_available))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct UsernameAvailability {
    pub username: String,
    pub available: bool,
}

/// Pre-join check so a client can reject a name already bound to a
/// live connection. Joining still supersedes; this is advisory.
pub async fn username_available(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
) -> GatewayResult<Json<UsernameAvailability>> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "username must not be empty".to_string(),
        ));
    }

    let taken = state.presence.username_taken(&name).await;
    Ok(Json(UsernameAvailability {
        username: name,
        available: !taken,
    }))
}
