use crate::api::handlers;
use crate::metrics::{DecisionStats, MetricsSummary, RouteStats, ServiceStats, UserTypeStats};
use crate::types::{
    AgentDescriptor, AgentSummary, Candidate, Citation, Decision, FusionVerdict, Identity,
    PipelineResult, QaAnswer,
};
use axum::Json;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Veriface",
        description = "Biometric identification orchestrator with regulations QA"
    ),
    paths(
        handlers::agents::health,
        handlers::agents::list_agents,
        handlers::identify::identify_and_answer,
        handlers::metrics::summary,
        handlers::metrics::by_user_type,
        handlers::metrics::decisions,
        handlers::metrics::services,
    ),
    components(schemas(
        AgentDescriptor,
        AgentSummary,
        Candidate,
        Citation,
        Decision,
        FusionVerdict,
        Identity,
        PipelineResult,
        QaAnswer,
        handlers::identify::IdentifyForm,
        MetricsSummary,
        RouteStats,
        UserTypeStats,
        DecisionStats,
        ServiceStats,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "identify", description = "Identification pipeline"),
        (name = "metrics", description = "Audit trail aggregates"),
        (name = "agents", description = "Verification agent registry"),
        (name = "health", description = "Liveness")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/agents",
            "/identify-and-answer",
            "/metrics/summary",
            "/metrics/by-user-type",
            "/metrics/decisions",
            "/metrics/services",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
