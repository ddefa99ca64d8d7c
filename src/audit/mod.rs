//! Audit trail
//!
//! Two append-only record streams:
//!
//! - [`AccessRecord`]: one per pipeline invocation, written on every path
//!   including the too-many-failures abort.
//! - [`ServiceRecord`]: one per outbound call (verification agent or QA
//!   service), written exactly once whatever the call's outcome.
//!
//! Sinks are a side channel. Callers go through [`record_access`] and
//! [`record_service`], which log and swallow sink errors so a failed write
//! never changes the pipeline result.

pub mod memory;

pub use memory::MemoryAuditSink;

use crate::types::{AgentSummary, Decision, Identity, Result, UserContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which kind of collaborator an outbound call went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Verification,
    Qa,
}

impl ServiceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceKind::Verification => "verification",
            ServiceKind::Qa => "qa",
        }
    }
}

/// What was received, without the image itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputMetadata {
    pub has_image: bool,
    pub has_question: bool,
    pub size_bytes: usize,
    pub mime_type: Option<String>,
    /// SHA-256 hex digest of the image bytes
    pub image_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub request_id: String,
    pub ts: DateTime<Utc>,
    pub route: String,
    pub user: UserContext,
    pub input: InputMetadata,
    /// Absent when the invocation aborted before fusion.
    pub decision: Option<Decision>,
    pub identity: Option<Identity>,
    pub agents: AgentSummary,
    pub qa_used: bool,
    pub elapsed_ms: f64,
    pub status_code: u16,
    pub client_addr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub request_id: String,
    pub ts: DateTime<Utc>,
    pub service_kind: ServiceKind,
    pub service_name: String,
    pub endpoint: String,
    pub payload_size_bytes: usize,
    pub latency_ms: f64,
    pub timed_out: bool,
    pub error: Option<String>,
    /// HTTP status, absent when no response arrived.
    pub status_code: Option<u16>,
    pub result: Option<serde_json::Value>,
}

impl ServiceRecord {
    /// A record for a call that has just been attempted; outcome fields start empty.
    pub fn attempt(
        request_id: &str,
        service_kind: ServiceKind,
        service_name: &str,
        endpoint: &str,
        payload_size_bytes: usize,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            ts: Utc::now(),
            service_kind,
            service_name: service_name.to_string(),
            endpoint: endpoint.to_string(),
            payload_size_bytes,
            latency_ms: 0.0,
            timed_out: false,
            error: None,
            status_code: None,
            result: None,
        }
    }

    pub fn mark_timeout(&mut self) {
        self.timed_out = true;
        self.error = Some("Timeout".to_string());
    }
}

/// Append-only destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append_access(&self, record: AccessRecord) -> Result<()>;

    async fn append_service(&self, record: ServiceRecord) -> Result<()>;
}

/// Write an access record, logging instead of failing.
pub async fn record_access(sink: &dyn AuditSink, record: AccessRecord) {
    let request_id = record.request_id.clone();
    if let Err(e) = sink.append_access(record).await {
        tracing::warn!(request_id = %request_id, "Failed to write access record: {}", e);
    }
}

/// Write a service record, logging instead of failing.
pub async fn record_service(sink: &dyn AuditSink, record: ServiceRecord) {
    let request_id = record.request_id.clone();
    let service = record.service_name.clone();
    if let Err(e) = sink.append_service(record).await {
        tracing::warn!(
            request_id = %request_id,
            service = %service,
            "Failed to write service record: {}",
            e
        );
    }
}

/// Truncate upstream error bodies before they go into a record.
pub(crate) fn error_excerpt(body: &str) -> String {
    body.chars().take(100).collect()
}

/// Milliseconds since `start`, rounded to microsecond precision.
pub(crate) fn elapsed_ms(start: std::time::Instant) -> f64 {
    (start.elapsed().as_secs_f64() * 1_000_000.0).round() / 1000.0
}
