//! Shared fixtures for integration tests.
//!
//! Verification agents and the QA service are stood up as wiremock servers;
//! audit records are captured in a `MemoryAuditSink` unless a test needs the
//! database.

#![allow(dead_code)]

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use veriface::{
    FusionPolicy, PipelineCoordinator, StaticAgentRegistry, VerificationDispatcher,
    agents::AgentRegistry,
    audit::AuditSink,
    qa::HttpQaClient,
    types::AgentDescriptor,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const AGENT_TIMEOUT: Duration = Duration::from_millis(500);
pub const QA_TIMEOUT: Duration = Duration::from_millis(500);

/// Address nothing listens on; connections are refused immediately.
pub const UNREACHABLE_ENDPOINT: &str = "http://127.0.0.1:1/verify";

/// Agent answering `POST /verify` with `{"score": score}`.
pub async fn scoring_agent(score: f64) -> MockServer {
    agent_responding(ResponseTemplate::new(200).set_body_json(json!({ "score": score }))).await
}

/// Agent answering with a bare status code.
pub async fn failing_agent(status: u16) -> MockServer {
    agent_responding(ResponseTemplate::new(status).set_body_string("agent exploded")).await
}

/// Agent that answers only after `delay`.
pub async fn slow_agent(score: f64, delay: Duration) -> MockServer {
    agent_responding(
        ResponseTemplate::new(200)
            .set_body_json(json!({ "score": score }))
            .set_delay(delay),
    )
    .await
}

pub async fn agent_responding(template: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .respond_with(template)
        .mount(&server)
        .await;
    server
}

pub fn descriptor(name: &str, server: &MockServer) -> AgentDescriptor {
    AgentDescriptor::new(name, format!("{}/verify", server.uri()))
}

pub fn unreachable(name: &str) -> AgentDescriptor {
    AgentDescriptor::new(name, UNREACHABLE_ENDPOINT)
}

/// QA service answering `POST /ask`, expected to be called `calls` times.
pub async fn qa_service(answer: &str, calls: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ask"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": answer,
            "citations": [{ "doc": "reglamento-biblioteca.pdf", "page": 3 }]
        })))
        .expect(calls)
        .mount(&server)
        .await;
    server
}

pub fn dispatcher(
    registry: Arc<dyn AgentRegistry>,
    audit: Arc<dyn AuditSink>,
) -> VerificationDispatcher {
    VerificationDispatcher::new(registry, audit, AGENT_TIMEOUT).unwrap()
}

/// Pipeline over a fixed agent list with default fusion constants.
pub fn pipeline(
    agents: Vec<AgentDescriptor>,
    qa_url: &str,
    audit: Arc<dyn AuditSink>,
) -> PipelineCoordinator {
    let registry = Arc::new(StaticAgentRegistry::new(agents));
    let qa = HttpQaClient::new(qa_url, "normativa-rag", 5, QA_TIMEOUT, audit.clone()).unwrap();
    PipelineCoordinator::new(
        dispatcher(registry, audit.clone()),
        Arc::new(qa),
        audit,
        FusionPolicy::default(),
    )
}

/// A few bytes with a PNG signature.
pub fn png_bytes() -> Vec<u8> {
    vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3, 4]
}
