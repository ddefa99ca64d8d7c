//! Regulations QA client
//!
//! Only consulted after a confident identification. The remote service is a
//! RAG agent answering `POST {url}/ask` with
//! `{"message", "use_rag": true, "top_k"}` and replying
//! `{"response", "citations": [...]}`.

use crate::audit::{self, AuditSink, ServiceKind, ServiceRecord};
use crate::types::{AppError, Citation, QaAnswer, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Answers free-text questions about institutional regulations.
#[async_trait]
pub trait QaClient: Send + Sync {
    /// Ask `question` on behalf of request `request_id`.
    ///
    /// Any failure (transport, timeout, non-200, unreadable body) is an `Err`;
    /// the pipeline decides whether to absorb it.
    async fn ask(&self, request_id: &str, question: &str) -> Result<QaAnswer>;
}

#[derive(Debug, Deserialize)]
struct AskResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    citations: Vec<Citation>,
}

pub struct HttpQaClient {
    http: reqwest::Client,
    endpoint: String,
    service_name: String,
    top_k: u32,
    timeout: Duration,
    audit: Arc<dyn AuditSink>,
}

impl HttpQaClient {
    pub fn new(
        base_url: &str,
        service_name: impl Into<String>,
        top_k: u32,
        timeout: Duration,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: format!("{}/ask", base_url.trim_end_matches('/')),
            service_name: service_name.into(),
            top_k,
            timeout,
            audit,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn exchange(&self, question: &str, record: &mut ServiceRecord) -> Result<QaAnswer> {
        let payload = json!({
            "message": question,
            "use_rag": true,
            "top_k": self.top_k,
        });

        let call = async {
            let response = self.http.post(&self.endpoint).json(&payload).send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let (status, text) = match tokio::time::timeout(self.timeout, call).await {
            Err(_) => {
                record.mark_timeout();
                return Err(AppError::Upstream("QA service timed out".to_string()));
            }
            Ok(Err(e)) if e.is_timeout() => {
                record.mark_timeout();
                return Err(AppError::Upstream("QA service timed out".to_string()));
            }
            Ok(Err(e)) => {
                record.error = Some(audit::error_excerpt(&e.to_string()));
                return Err(AppError::Upstream(format!("QA service unreachable: {}", e)));
            }
            Ok(Ok(exchange)) => exchange,
        };

        record.status_code = Some(status.as_u16());
        if status != StatusCode::OK {
            let error = format!("HTTP {}: {}", status.as_u16(), audit::error_excerpt(&text));
            record.error = Some(error.clone());
            return Err(AppError::Upstream(error));
        }

        let body: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            record.error = Some(format!("Invalid QA response: {}", e));
            AppError::Upstream(format!("Invalid QA response: {}", e))
        })?;
        record.result = Some(body.clone());

        let parsed: AskResponse = serde_json::from_value(body).map_err(|e| {
            record.error = Some(format!("Invalid QA response: {}", e));
            AppError::Upstream(format!("Invalid QA response: {}", e))
        })?;

        Ok(QaAnswer {
            text: parsed.response,
            citations: parsed.citations,
        })
    }
}

#[async_trait]
impl QaClient for HttpQaClient {
    async fn ask(&self, request_id: &str, question: &str) -> Result<QaAnswer> {
        let mut record = ServiceRecord::attempt(
            request_id,
            ServiceKind::Qa,
            &self.service_name,
            &self.endpoint,
            question.len(),
        );

        let start = Instant::now();
        let result = self.exchange(question, &mut record).await;
        record.latency_ms = audit::elapsed_ms(start);

        tracing::debug!(
            request_id = %request_id,
            latency_ms = record.latency_ms,
            ok = result.is_ok(),
            "QA call complete"
        );

        audit::record_service(self.audit.as_ref(), record).await;
        result
    }
}
