//! Verification dispatch
//!
//! Sends one image to every active agent concurrently and collects exactly one
//! [`AgentOutcome`] per agent, in registry order. Individual failures never
//! abort the dispatch: a timed-out, unreachable or misbehaving agent yields a
//! zero-score outcome tagged with its [`FailureReason`].
//!
//! Each call runs in its own task and writes its own service record, so the
//! audit trail stays complete even if the caller stops waiting.

use crate::agents::AgentRegistry;
use crate::audit::{self, AuditSink, ServiceKind, ServiceRecord};
use crate::types::{AgentDescriptor, AgentOutcome, AppError, FailureReason, Result};
use base64::{Engine as _, engine::general_purpose};
use futures::future::join_all;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fans a single image out to all active verification agents.
pub struct VerificationDispatcher {
    registry: Arc<dyn AgentRegistry>,
    audit: Arc<dyn AuditSink>,
    http: reqwest::Client,
    timeout: Duration,
}

impl VerificationDispatcher {
    pub fn new(
        registry: Arc<dyn AgentRegistry>,
        audit: Arc<dyn AuditSink>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            registry,
            audit,
            http,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Query every active agent with `image` and return their outcomes.
    ///
    /// The result has one entry per agent in the registry snapshot. Zero
    /// active agents is not an error and yields an empty list. Only a
    /// registry failure makes this return `Err`.
    pub async fn dispatch(&self, request_id: &str, image: &[u8]) -> Result<Vec<AgentOutcome>> {
        let agents = self.registry.list_active_agents().await?;
        if agents.is_empty() {
            tracing::debug!(request_id = %request_id, "No active agents to dispatch to");
            return Ok(Vec::new());
        }

        let encoded = general_purpose::STANDARD.encode(image);
        let payload_size = encoded.len();
        let body = Arc::new(json!({ "image": encoded }));

        let names: Vec<String> = agents.iter().map(|a| a.name.clone()).collect();
        let handles: Vec<_> = agents
            .into_iter()
            .map(|agent| {
                tokio::spawn(call_agent(AgentCall {
                    http: self.http.clone(),
                    audit: Arc::clone(&self.audit),
                    request_id: request_id.to_string(),
                    agent,
                    body: Arc::clone(&body),
                    payload_size,
                    timeout: self.timeout,
                }))
            })
            .collect();

        let outcomes = join_all(handles)
            .await
            .into_iter()
            .zip(names)
            .map(|(joined, name)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(request_id = %request_id, agent = %name, "Agent task failed: {}", e);
                    AgentOutcome::failed(name, FailureReason::TransportError, 0.0)
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            request_id = %request_id,
            queried = outcomes.len(),
            failures = outcomes.iter().filter(|o| o.is_failure()).count(),
            "Dispatch complete"
        );

        Ok(outcomes)
    }
}

struct AgentCall {
    http: reqwest::Client,
    audit: Arc<dyn AuditSink>,
    request_id: String,
    agent: AgentDescriptor,
    body: Arc<Value>,
    payload_size: usize,
    timeout: Duration,
}

async fn call_agent(call: AgentCall) -> AgentOutcome {
    let AgentCall {
        http,
        audit,
        request_id,
        agent,
        body,
        payload_size,
        timeout,
    } = call;

    let mut record = ServiceRecord::attempt(
        &request_id,
        ServiceKind::Verification,
        &agent.name,
        &agent.verify_endpoint,
        payload_size,
    );

    let start = Instant::now();
    let exchange = async {
        let response = http
            .post(&agent.verify_endpoint)
            .json(body.as_ref())
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        Ok::<_, reqwest::Error>((status, text))
    };
    let result = tokio::time::timeout(timeout, exchange).await;
    let latency_ms = audit::elapsed_ms(start);
    record.latency_ms = latency_ms;

    let outcome = match result {
        Err(_) => {
            record.mark_timeout();
            AgentOutcome::failed(&agent.name, FailureReason::Timeout, latency_ms)
        }
        Ok(Err(e)) if e.is_timeout() => {
            record.mark_timeout();
            AgentOutcome::failed(&agent.name, FailureReason::Timeout, latency_ms)
        }
        Ok(Err(e)) => {
            record.error = Some(audit::error_excerpt(&e.to_string()));
            AgentOutcome::failed(&agent.name, FailureReason::TransportError, latency_ms)
        }
        Ok(Ok((status, text))) => {
            record.status_code = Some(status.as_u16());
            if status != StatusCode::OK {
                record.error = Some(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    audit::error_excerpt(&text)
                ));
                AgentOutcome::failed(&agent.name, FailureReason::BadStatus, latency_ms)
            } else {
                match parse_verify_response(&text) {
                    Some((score, raw)) => {
                        record.result = Some(json!({ "score": score, "raw": raw.clone() }));
                        AgentOutcome::success(&agent.name, score, raw, latency_ms)
                    }
                    None => {
                        record.error = Some(format!(
                            "Invalid verify response: {}",
                            audit::error_excerpt(&text)
                        ));
                        AgentOutcome::failed(&agent.name, FailureReason::TransportError, latency_ms)
                    }
                }
            }
        }
    };

    if outcome.is_failure() {
        tracing::warn!(
            request_id = %request_id,
            agent = %agent.name,
            reason = outcome.failure_reason.as_str(),
            latency_ms,
            "Verification agent failed"
        );
    }

    audit::record_service(audit.as_ref(), record).await;
    outcome
}

/// Extract the numeric `score` from a verify response body.
fn parse_verify_response(body: &str) -> Option<(f64, Value)> {
    let raw: Value = serde_json::from_str(body).ok()?;
    let score = raw.get("score")?.as_f64()?;
    Some((score, raw))
}
