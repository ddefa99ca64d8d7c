use crate::AppState;
use crate::api::{docs, handlers};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    middleware::{self, Next},
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Room for multipart boundaries, headers and the question field.
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn create_router(state: AppState) -> Router {
    let max_body = state.config_manager.config().limits.max_image_bytes + MULTIPART_OVERHEAD_BYTES;
    let auth = state.auth.clone();

    let public_routes = Router::new()
        // Public routes (no auth required)
        .route("/health", get(handlers::agents::health))
        .route("/api-docs/openapi.json", get(docs::openapi_json));

    let protected_routes = Router::new()
        // Protected routes (auth required)
        .route(
            "/identify-and-answer",
            post(handlers::identify::identify_and_answer),
        )
        .route("/agents", get(handlers::agents::list_agents))
        // Metrics routes
        .route("/metrics/summary", get(handlers::metrics::summary))
        .route("/metrics/by-user-type", get(handlers::metrics::by_user_type))
        .route("/metrics/decisions", get(handlers::metrics::decisions))
        .route("/metrics/services", get(handlers::metrics::services))
        .layer(middleware::from_fn(move |req: Request, next: Next| {
            crate::auth::middleware::auth_middleware(auth.clone(), req, next)
        }));

    public_routes
        .merge(protected_routes)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
