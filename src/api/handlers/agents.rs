use crate::{AppState, types::AgentDescriptor, types::Result};
use axum::{Json, extract::State};

/// Active verification agents, as the next dispatch would see them
#[utoipa::path(
    get,
    path = "/agents",
    responses(
        (status = 200, description = "Active agents", body = [AgentDescriptor]),
        (status = 401, description = "Unauthorized")
    ),
    tag = "agents",
    security(("bearer" = []))
)]
pub async fn list_agents(State(state): State<AppState>) -> Result<Json<Vec<AgentDescriptor>>> {
    Ok(Json(state.registry.list_active_agents().await?))
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = String)),
    tag = "health"
)]
pub async fn health() -> &'static str {
    "OK"
}
