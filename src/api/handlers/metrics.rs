use crate::{
    AppState,
    metrics::{DecisionStats, MetricsSummary, MetricsWindow, ServiceStats, UserTypeStats},
    types::Result,
};
use axum::{
    Json,
    extract::{Query, State},
};

/// Request volume, latency and agent timeouts, overall and per route
#[utoipa::path(
    get,
    path = "/metrics/summary",
    params(("days" = Option<u32>, Query, description = "Lookback window in days (default 7)")),
    responses(
        (status = 200, description = "Summary metrics", body = MetricsSummary),
        (status = 401, description = "Unauthorized")
    ),
    tag = "metrics",
    security(("bearer" = []))
)]
pub async fn summary(
    State(state): State<AppState>,
    Query(window): Query<MetricsWindow>,
) -> Result<Json<MetricsSummary>> {
    tracing::debug!(days = window.days, "Fetching metrics summary");
    Ok(Json(state.db.metrics_summary(window).await?))
}

/// Traffic per user type, busiest first
#[utoipa::path(
    get,
    path = "/metrics/by-user-type",
    params(("days" = Option<u32>, Query, description = "Lookback window in days (default 7)")),
    responses(
        (status = 200, description = "Per user type stats", body = [UserTypeStats]),
        (status = 401, description = "Unauthorized")
    ),
    tag = "metrics",
    security(("bearer" = []))
)]
pub async fn by_user_type(
    State(state): State<AppState>,
    Query(window): Query<MetricsWindow>,
) -> Result<Json<Vec<UserTypeStats>>> {
    Ok(Json(state.db.metrics_by_user_type(window).await?))
}

/// Decision distribution
#[utoipa::path(
    get,
    path = "/metrics/decisions",
    params(("days" = Option<u32>, Query, description = "Lookback window in days (default 7)")),
    responses(
        (status = 200, description = "Per decision counts", body = [DecisionStats]),
        (status = 401, description = "Unauthorized")
    ),
    tag = "metrics",
    security(("bearer" = []))
)]
pub async fn decisions(
    State(state): State<AppState>,
    Query(window): Query<MetricsWindow>,
) -> Result<Json<Vec<DecisionStats>>> {
    Ok(Json(state.db.metrics_decisions(window).await?))
}

/// Verification agent reliability, most timeouts first
#[utoipa::path(
    get,
    path = "/metrics/services",
    params(("days" = Option<u32>, Query, description = "Lookback window in days (default 7)")),
    responses(
        (status = 200, description = "Per agent stats", body = [ServiceStats]),
        (status = 401, description = "Unauthorized")
    ),
    tag = "metrics",
    security(("bearer" = []))
)]
pub async fn services(
    State(state): State<AppState>,
    Query(window): Query<MetricsWindow>,
) -> Result<Json<Vec<ServiceStats>>> {
    Ok(Json(state.db.metrics_services(window).await?))
}
