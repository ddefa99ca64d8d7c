//! Audit store, agent registry and metrics queries against libsql.

mod common;

use chrono::{DateTime, Duration, Utc};
use common::*;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use veriface::{
    AppError, FusionPolicy, PipelineCoordinator, TursoClient, VerificationDispatcher,
    agents::AgentRegistry,
    audit::{AccessRecord, AuditSink, InputMetadata, ServiceKind, ServiceRecord},
    metrics::MetricsWindow,
    pipeline::IDENTIFY_ROUTE,
    qa::HttpQaClient,
    types::{AgentDescriptor, AgentSummary, Decision, IdentifyRequest, Identity, UserContext},
};

/// Current time truncated to the stored millisecond precision.
fn now_ms() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
}

fn access(request_id: &str, user_type: Option<&str>, decision: Option<Decision>) -> AccessRecord {
    AccessRecord {
        request_id: request_id.to_string(),
        ts: now_ms(),
        route: IDENTIFY_ROUTE.to_string(),
        user: UserContext::new(Some("u-1".to_string()), user_type.map(str::to_string)),
        input: InputMetadata {
            has_image: true,
            has_question: true,
            size_bytes: 1024,
            mime_type: Some("image/jpeg".to_string()),
            image_hash: Some("ab".repeat(32)),
        },
        decision,
        identity: decision.map(|_| Identity {
            name: Some("Ana".to_string()),
            score: 0.91,
        }),
        agents: AgentSummary {
            queried: 3,
            timeouts: 1,
            failures: 1,
        },
        qa_used: decision == Some(Decision::Identified),
        elapsed_ms: 100.0,
        status_code: if decision.is_some() { 200 } else { 504 },
        client_addr: Some("10.0.0.7".to_string()),
    }
}

fn service(request_id: &str, name: &str, latency_ms: f64, timed_out: bool) -> ServiceRecord {
    let mut record = ServiceRecord::attempt(
        request_id,
        ServiceKind::Verification,
        name,
        "http://agents.local/verify",
        4096,
    );
    record.ts = now_ms();
    record.latency_ms = latency_ms;
    if timed_out {
        record.mark_timeout();
    } else {
        record.status_code = Some(200);
        record.result = Some(json!({ "score": 0.5, "raw": { "score": 0.5 } }));
    }
    record
}

#[tokio::test]
async fn test_access_record_round_trip() {
    let db = TursoClient::new_memory().await.unwrap();
    let record = access("req-1", Some("student"), Some(Decision::Identified));

    db.append_access(record.clone()).await.unwrap();

    let stored = db.get_access_record("req-1").await.unwrap().unwrap();
    assert_eq!(stored, record);
    assert!(db.get_access_record("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_aborted_access_record_round_trip() {
    let db = TursoClient::new_memory().await.unwrap();
    let mut record = access("req-abort", None, None);
    record.user = UserContext::default();
    record.client_addr = None;

    db.insert_access_record(&record).await.unwrap();

    let stored = db.get_access_record("req-abort").await.unwrap().unwrap();
    assert!(stored.decision.is_none());
    assert!(stored.identity.is_none());
    assert!(stored.user.user_type.is_none());
    assert_eq!(stored.status_code, 504);
}

#[tokio::test]
async fn test_service_records_in_insertion_order() {
    let db = TursoClient::new_memory().await.unwrap();
    let ok = service("req-2", "Ana", 120.0, false);
    let timeout = service("req-2", "Luis", 3000.0, true);

    db.append_service(ok.clone()).await.unwrap();
    db.append_service(timeout.clone()).await.unwrap();
    db.append_service(service("other", "Ana", 1.0, false)).await.unwrap();

    let stored = db.service_records_for("req-2").await.unwrap();
    assert_eq!(stored, vec![ok, timeout]);
    assert_eq!(stored[1].error.as_deref(), Some("Timeout"));
    assert!(stored[1].status_code.is_none());
}

#[tokio::test]
async fn test_agent_registry_table() {
    let db = TursoClient::new_memory().await.unwrap();
    assert!(db.list_active_agents().await.unwrap().is_empty());

    db.upsert_agent(&AgentDescriptor::new("Pedro", "http://p/verify"))
        .await
        .unwrap();
    db.upsert_agent(&AgentDescriptor::new("Ana", "http://a/verify"))
        .await
        .unwrap();
    db.upsert_agent(&AgentDescriptor::new("Luis", "http://l/verify"))
        .await
        .unwrap();

    let names: Vec<String> = db
        .list_active_agents()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, vec!["Ana", "Luis", "Pedro"]);

    db.set_agent_active("Luis", false).await.unwrap();
    let active = db.list_active_agents().await.unwrap();
    assert_eq!(active.len(), 2);
    assert!(active.iter().all(|a| a.name != "Luis"));
    assert_eq!(db.list_agents().await.unwrap().len(), 3);

    let mut moved = AgentDescriptor::new("Ana", "http://a2/verify");
    moved.threshold = 0.8;
    db.upsert_agent(&moved).await.unwrap();
    let ana = db
        .list_agents()
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.name == "Ana")
        .unwrap();
    assert_eq!(ana, moved);

    assert!(matches!(
        db.set_agent_active("Nobody", true).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_metrics_respect_window() {
    let db = TursoClient::new_memory().await.unwrap();

    db.insert_access_record(&access("r1", Some("student"), Some(Decision::Identified)))
        .await
        .unwrap();
    db.insert_access_record(&access("r2", Some("student"), Some(Decision::Unknown)))
        .await
        .unwrap();
    let mut r3 = access("r3", Some("staff"), Some(Decision::Identified));
    r3.elapsed_ms = 400.0;
    db.insert_access_record(&r3).await.unwrap();
    db.insert_access_record(&access("r4", None, None)).await.unwrap();

    let mut stale = access("old", Some("visitor"), Some(Decision::Ambiguous));
    stale.ts = now_ms() - Duration::days(30);
    db.insert_access_record(&stale).await.unwrap();

    let summary = db.metrics_summary(MetricsWindow::default()).await.unwrap();
    assert_eq!(summary.period_days, 7);
    assert_eq!(summary.total_requests, 4);
    assert_eq!(summary.avg_latency, 175.0);
    assert_eq!(summary.timeouts, 4);
    assert_eq!(summary.routes.len(), 1);
    assert_eq!(summary.routes[0].route, IDENTIFY_ROUTE);
    assert_eq!(summary.routes[0].count, 4);
    assert_eq!(summary.routes[0].p50, 100.0);

    let wide = db.metrics_summary(MetricsWindow { days: 60 }).await.unwrap();
    assert_eq!(wide.total_requests, 5);

    let by_type = db.metrics_by_user_type(MetricsWindow::default()).await.unwrap();
    assert_eq!(by_type[0].user_type.as_deref(), Some("student"));
    assert_eq!(by_type[0].count, 2);
    assert_eq!(by_type.len(), 3);
    assert!(by_type.iter().any(|s| s.user_type.is_none()));
    assert!(by_type.iter().all(|s| s.user_type.as_deref() != Some("visitor")));

    let decisions = db.metrics_decisions(MetricsWindow::default()).await.unwrap();
    assert_eq!(decisions[0].decision.as_deref(), Some("identified"));
    assert_eq!(decisions[0].count, 2);
    assert!(decisions.iter().any(|d| d.decision.is_none() && d.count == 1));
    assert!(
        decisions
            .iter()
            .all(|d| d.decision.as_deref() != Some("ambiguous"))
    );
}

#[tokio::test]
async fn test_service_metrics_worst_first() {
    let db = TursoClient::new_memory().await.unwrap();
    for record in [
        service("r1", "Ana", 100.0, false),
        service("r2", "Ana", 200.0, false),
        service("r1", "Luis", 3000.0, true),
        service("r2", "Luis", 100.0, false),
    ] {
        db.insert_service_record(&record).await.unwrap();
    }

    let mut qa = ServiceRecord::attempt("r1", ServiceKind::Qa, "normativa-rag", "http://qa/ask", 10);
    qa.ts = now_ms();
    db.insert_service_record(&qa).await.unwrap();

    let mut stale = service("r0", "Pedro", 50.0, true);
    stale.ts = now_ms() - Duration::days(30);
    db.insert_service_record(&stale).await.unwrap();

    let stats = db.metrics_services(MetricsWindow::default()).await.unwrap();
    let names: Vec<&str> = stats.iter().map(|s| s.service_name.as_str()).collect();
    assert_eq!(names, vec!["Luis", "Ana"]);
    assert_eq!(stats[0].timeouts, 1);
    assert_eq!(stats[0].queries, 2);
    assert_eq!(stats[0].avg_latency, 1550.0);
    assert_eq!(stats[1].timeouts, 0);
    assert_eq!(stats[1].avg_latency, 150.0);
}

#[tokio::test]
async fn test_empty_metrics() {
    let db = TursoClient::new_memory().await.unwrap();

    let summary = db.metrics_summary(MetricsWindow { days: 1 }).await.unwrap();
    assert_eq!(summary.total_requests, 0);
    assert_eq!(summary.avg_latency, 0.0);
    assert!(summary.routes.is_empty());
    assert!(db.metrics_services(MetricsWindow::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_local_file_persists() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("audit.db");
    let path = path.to_str().unwrap();

    {
        let db = TursoClient::new_local(path).await.unwrap();
        db.insert_access_record(&access("persisted", Some("staff"), Some(Decision::Unknown)))
            .await
            .unwrap();
        db.upsert_agent(&AgentDescriptor::new("Ana", "http://a/verify"))
            .await
            .unwrap();
    }

    let reopened = TursoClient::new_local(path).await.unwrap();
    assert!(reopened.get_access_record("persisted").await.unwrap().is_some());
    assert_eq!(reopened.list_active_agents().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_pipeline_writes_audit_rows() {
    let ana = scoring_agent(0.9).await;
    let luis = failing_agent(502).await;
    let qa = qa_service("Open 8 to 18.", 1).await;

    let db = Arc::new(TursoClient::new_memory().await.unwrap());
    db.upsert_agent(&descriptor("Ana", &ana)).await.unwrap();
    db.upsert_agent(&descriptor("Luis", &luis)).await.unwrap();

    let registry: Arc<dyn AgentRegistry> = db.clone();
    let audit: Arc<dyn AuditSink> = db.clone();
    let dispatcher = VerificationDispatcher::new(registry, audit.clone(), AGENT_TIMEOUT).unwrap();
    let qa_client =
        HttpQaClient::new(&qa.uri(), "normativa-rag", 5, QA_TIMEOUT, audit.clone()).unwrap();
    let pipeline =
        PipelineCoordinator::new(dispatcher, Arc::new(qa_client), audit, FusionPolicy::default());

    let mut request = IdentifyRequest::new(png_bytes())
        .with_question("Opening hours?")
        .with_user(UserContext::new(None, Some("visitor".to_string())));
    request.client_addr = Some("192.168.1.20".to_string());
    let result = pipeline.handle(request).await.unwrap();

    let stored = db.get_access_record(&result.request_id).await.unwrap().unwrap();
    assert_eq!(stored.decision, Some(Decision::Identified));
    assert_eq!(stored.agents.failures, 1);
    assert_eq!(stored.client_addr.as_deref(), Some("192.168.1.20"));
    assert!(stored.qa_used);

    let services = db.service_records_for(&result.request_id).await.unwrap();
    assert_eq!(services.len(), 3);
    assert_eq!(
        services
            .iter()
            .filter(|r| r.service_kind == ServiceKind::Qa)
            .count(),
        1
    );
    let qa_result = services
        .iter()
        .find(|r| r.service_kind == ServiceKind::Qa)
        .and_then(|r| r.result.clone())
        .unwrap();
    assert_eq!(qa_result["response"], json!("Open 8 to 18."));
}
