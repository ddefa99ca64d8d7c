use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

// ============= Registry Types =============

/// One verification agent as seen by a single dispatch.
///
/// Snapshots are fetched fresh from the registry for every request and dropped
/// once the request completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AgentDescriptor {
    pub name: String,
    pub verify_endpoint: String,
    /// Per-agent threshold kept from the registry entry. Fusion only applies
    /// the global threshold/margin pair.
    #[serde(default = "default_agent_threshold")]
    pub threshold: f64,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_agent_threshold() -> f64 {
    0.75
}

fn default_true() -> bool {
    true
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>, verify_endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verify_endpoint: verify_endpoint.into(),
            threshold: default_agent_threshold(),
            active: true,
        }
    }
}

// ============= Dispatch Types =============

/// Why an agent call did not produce a usable score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    None,
    Timeout,
    TransportError,
    BadStatus,
}

impl FailureReason {
    pub fn is_failure(self) -> bool {
        self != FailureReason::None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::None => "none",
            FailureReason::Timeout => "timeout",
            FailureReason::TransportError => "transport_error",
            FailureReason::BadStatus => "bad_status",
        }
    }
}

/// Result of one verification call. Failed calls carry a score of 0.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AgentOutcome {
    pub agent_name: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<serde_json::Value>,
    pub latency_ms: f64,
    pub failure_reason: FailureReason,
}

impl AgentOutcome {
    pub fn success(
        agent_name: impl Into<String>,
        score: f64,
        raw_payload: serde_json::Value,
        latency_ms: f64,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            score,
            raw_payload: Some(raw_payload),
            latency_ms,
            failure_reason: FailureReason::None,
        }
    }

    pub fn failed(agent_name: impl Into<String>, reason: FailureReason, latency_ms: f64) -> Self {
        Self {
            agent_name: agent_name.into(),
            score: 0.0,
            raw_payload: None,
            latency_ms,
            failure_reason: reason,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure_reason.is_failure()
    }
}

// ============= Fusion Types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Identified,
    Ambiguous,
    Unknown,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Identified => "identified",
            Decision::Ambiguous => "ambiguous",
            Decision::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    pub name: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Candidate {
    pub name: String,
    pub score: f64,
}

/// Output of [`crate::fusion::fuse`]. Recomputed per request, never stored on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FusionVerdict {
    pub decision: Decision,
    pub identity: Identity,
    /// At most five entries, non-increasing by score.
    pub candidates: Vec<Candidate>,
}

// ============= QA Types =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Citation {
    pub doc: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub page: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Answer attached to an identified result when a question was asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QaAnswer {
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

/// Page references come back as either `"12"` or `12` depending on the document loader.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

// ============= Pipeline Types =============

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserContext {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub user_type: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "basic".to_string()
}

impl UserContext {
    pub fn new(id: Option<String>, user_type: Option<String>) -> Self {
        Self {
            id,
            user_type,
            role: default_role(),
        }
    }
}

/// Everything the entry surface hands to the pipeline for one invocation.
#[derive(Debug, Clone, Default)]
pub struct IdentifyRequest {
    pub image: Vec<u8>,
    pub mime_type: Option<String>,
    pub question: Option<String>,
    pub user: UserContext,
    pub client_addr: Option<String>,
    /// Entry surface recorded in the access record; the HTTP route when unset.
    pub route: Option<String>,
}

impl IdentifyRequest {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            ..Default::default()
        }
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }

    pub fn with_user(mut self, user: UserContext) -> Self {
        self.user = user;
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// The question, if one was supplied and is not blank.
    pub fn effective_question(&self) -> Option<&str> {
        self.question
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }
}

/// Per-agent counts reported with every result and access record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AgentSummary {
    pub queried: usize,
    pub timeouts: usize,
    pub failures: usize,
}

impl AgentSummary {
    pub fn from_outcomes(outcomes: &[AgentOutcome]) -> Self {
        Self {
            queried: outcomes.len(),
            timeouts: outcomes
                .iter()
                .filter(|o| o.failure_reason == FailureReason::Timeout)
                .count(),
            failures: outcomes.iter().filter(|o| o.is_failure()).count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PipelineResult {
    pub request_id: String,
    #[serde(flatten)]
    pub verdict: FusionVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normativa_answer: Option<QaAnswer>,
    pub timing_ms: f64,
    pub agents: AgentSummary,
    pub qa_used: bool,
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Multiple verification agents failed: {failures}/{total}")]
    TooManyAgentFailures { failures: usize, total: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            AppError::Database(_) | AppError::Configuration(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::TooManyAgentFailures { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();

        let body = match &self {
            AppError::TooManyAgentFailures { failures, total } => serde_json::json!({
                "error": self.to_string(),
                "failures": failures,
                "total": total,
            }),
            AppError::Database(msg)
            | AppError::Configuration(msg)
            | AppError::Auth(msg)
            | AppError::NotFound(msg)
            | AppError::InvalidInput(msg)
            | AppError::UnsupportedMediaType(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::Upstream(msg)
            | AppError::Internal(msg) => serde_json::json!({ "error": msg }),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
