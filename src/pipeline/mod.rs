//! Identify-and-answer pipeline
//!
//! One invocation runs, in order:
//!
//! 1. fan-out to every active verification agent
//! 2. the partial-failure gate (abort when more agents failed than tolerated)
//! 3. fusion of the surviving scores into a verdict
//! 4. an optional QA call, only for `identified` verdicts with a question
//! 5. one access record
//!
//! Only the gate (and a broken registry) fails the invocation. Agent, QA and
//! audit failures degrade into data.

use crate::audit::{self, AccessRecord, AuditSink, InputMetadata};
use crate::dispatch::VerificationDispatcher;
use crate::fusion::{self, FusionPolicy};
use crate::qa::QaClient;
use crate::types::{
    AgentSummary, AppError, Decision, IdentifyRequest, Identity, PipelineResult, Result,
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Route recorded in access records for invocations that name no route.
pub const IDENTIFY_ROUTE: &str = "/identify-and-answer";

/// Drives one request through dispatch, fusion and the optional QA step.
pub struct PipelineCoordinator {
    dispatcher: VerificationDispatcher,
    qa: Arc<dyn QaClient>,
    audit: Arc<dyn AuditSink>,
    policy: FusionPolicy,
    max_tolerated_failures: usize,
}

impl PipelineCoordinator {
    pub fn new(
        dispatcher: VerificationDispatcher,
        qa: Arc<dyn QaClient>,
        audit: Arc<dyn AuditSink>,
        policy: FusionPolicy,
    ) -> Self {
        Self {
            dispatcher,
            qa,
            audit,
            policy,
            max_tolerated_failures: 1,
        }
    }

    /// Number of failing agents tolerated before the invocation aborts.
    pub fn with_max_tolerated_failures(mut self, max: usize) -> Self {
        self.max_tolerated_failures = max;
        self
    }

    pub fn policy(&self) -> &FusionPolicy {
        &self.policy
    }

    pub fn qa(&self) -> &Arc<dyn QaClient> {
        &self.qa
    }

    /// Run [`handle`](Self::handle) on its own task.
    ///
    /// The invocation, including its access record, completes even when the
    /// caller's future is dropped, e.g. on a client disconnect.
    pub async fn handle_detached(
        self: &Arc<Self>,
        request: IdentifyRequest,
    ) -> Result<PipelineResult> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.handle(request).await })
            .await
            .map_err(|e| AppError::Internal(format!("Pipeline task failed: {}", e)))?
    }

    pub async fn handle(&self, request: IdentifyRequest) -> Result<PipelineResult> {
        let start = Instant::now();
        let request_id = Uuid::new_v4().to_string();

        let outcomes = match self.dispatcher.dispatch(&request_id, &request.image).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                tracing::error!(request_id = %request_id, "Agent registry unavailable: {}", e);
                self.log_access(
                    &request_id,
                    &request,
                    None,
                    AgentSummary::default(),
                    false,
                    start,
                    e.status_code().as_u16(),
                )
                .await;
                return Err(e);
            }
        };
        let summary = AgentSummary::from_outcomes(&outcomes);

        if summary.failures > self.max_tolerated_failures {
            let err = AppError::TooManyAgentFailures {
                failures: summary.failures,
                total: summary.queried,
            };
            tracing::warn!(
                request_id = %request_id,
                failures = summary.failures,
                total = summary.queried,
                "Aborting request: too many verification agents failed"
            );
            self.log_access(
                &request_id,
                &request,
                None,
                summary,
                false,
                start,
                err.status_code().as_u16(),
            )
            .await;
            return Err(err);
        }

        let verdict = fusion::fuse(&outcomes, &self.policy);

        let mut qa_used = false;
        let mut normativa_answer = None;
        if verdict.decision == Decision::Identified {
            if let Some(question) = request.effective_question() {
                qa_used = true;
                match self.qa.ask(&request_id, question).await {
                    Ok(answer) => normativa_answer = Some(answer),
                    Err(e) => {
                        tracing::warn!(
                            request_id = %request_id,
                            "QA unavailable, answering without it: {}",
                            e
                        );
                    }
                }
            }
        }

        let timing_ms = audit::elapsed_ms(start);

        tracing::info!(
            request_id = %request_id,
            decision = %verdict.decision,
            identity = verdict.identity.name.as_deref().unwrap_or("-"),
            score = verdict.identity.score,
            queried = summary.queried,
            failures = summary.failures,
            qa_used,
            timing_ms,
            "Identification complete"
        );

        self.log_access(
            &request_id,
            &request,
            Some((verdict.decision, verdict.identity.clone())),
            summary,
            qa_used,
            start,
            200,
        )
        .await;

        Ok(PipelineResult {
            request_id,
            verdict,
            normativa_answer,
            timing_ms,
            agents: summary,
            qa_used,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_access(
        &self,
        request_id: &str,
        request: &IdentifyRequest,
        verdict: Option<(Decision, Identity)>,
        agents: AgentSummary,
        qa_used: bool,
        start: Instant,
        status_code: u16,
    ) {
        let (decision, identity) = match verdict {
            Some((decision, identity)) => (Some(decision), Some(identity)),
            None => (None, None),
        };

        let record = AccessRecord {
            request_id: request_id.to_string(),
            ts: Utc::now(),
            route: request
                .route
                .clone()
                .unwrap_or_else(|| IDENTIFY_ROUTE.to_string()),
            user: request.user.clone(),
            input: input_metadata(request),
            decision,
            identity,
            agents,
            qa_used,
            elapsed_ms: audit::elapsed_ms(start),
            status_code,
            client_addr: request.client_addr.clone(),
        };

        audit::record_access(self.audit.as_ref(), record).await;
    }
}

/// Describe the request input without retaining the image.
pub fn input_metadata(request: &IdentifyRequest) -> InputMetadata {
    let has_image = !request.image.is_empty();
    InputMetadata {
        has_image,
        has_question: request.effective_question().is_some(),
        size_bytes: request.image.len(),
        mime_type: request.mime_type.clone(),
        image_hash: has_image.then(|| hex::encode(Sha256::digest(&request.image))),
    }
}
