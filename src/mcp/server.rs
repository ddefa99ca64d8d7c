use crate::pipeline::PipelineCoordinator;
use crate::types::{AppError, Decision, IdentifyRequest, PipelineResult, QaAnswer, UserContext};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Route recorded in access records for MCP identifications.
pub const MCP_IDENTIFY_ROUTE: &str = "mcp:identify_person";

/// Parameters for `identify_person`
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct IdentifyPersonParams {
    /// Base64-encoded JPEG or PNG image
    pub image_b64: String,
    /// Seconds to wait for a verdict before giving up on the reply
    pub timeout_s: Option<f64>,
}

/// Parameters for `ask_normativa`
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct AskNormativaParams {
    /// Question about university regulations
    pub question: String,
}

/// MCP server backed by the same pipeline as the HTTP API.
#[derive(Clone)]
pub struct VerifaceMcpServer {
    pipeline: Arc<PipelineCoordinator>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl VerifaceMcpServer {
    pub fn new(pipeline: Arc<PipelineCoordinator>) -> Self {
        Self {
            pipeline,
            tool_router: Self::tool_router(),
        }
    }

    /// Identify the person in a base64-encoded image
    #[tool(description = "Identify the person in a base64-encoded JPEG or PNG image")]
    pub async fn identify_person(
        &self,
        params: Parameters<IdentifyPersonParams>,
    ) -> Result<CallToolResult, McpError> {
        let IdentifyPersonParams { image_b64, timeout_s } = params.0;

        let image = match decode_image(&image_b64) {
            Ok(image) => image,
            Err(e) => return Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        };

        let mut request = IdentifyRequest::new(image)
            .with_user(UserContext::new(
                Some("mcp-user".to_string()),
                Some("mcp".to_string()),
            ))
            .with_route(MCP_IDENTIFY_ROUTE);
        request.mime_type = sniff_mime(&request.image).map(str::to_string);

        let run = self.pipeline.handle_detached(request);
        let outcome = match timeout_s.and_then(|s| Duration::try_from_secs_f64(s).ok()) {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Ok(CallToolResult::error(vec![Content::text(format!(
                        "No verdict within {}s",
                        limit.as_secs_f64()
                    ))]));
                }
            },
            None => run.await,
        };

        match outcome {
            Ok(result) => Ok(CallToolResult::success(vec![Content::text(
                describe_verdict(&result),
            )])),
            Err(e) => {
                tracing::warn!(route = MCP_IDENTIFY_ROUTE, "Identification failed: {}", e);
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "Identification failed: {}",
                    e
                ))]))
            }
        }
    }

    /// Ask the regulations QA service a question
    #[tool(description = "Ask a question about university regulations")]
    pub async fn ask_normativa(
        &self,
        params: Parameters<AskNormativaParams>,
    ) -> Result<CallToolResult, McpError> {
        let question = params.0.question;
        if question.trim().is_empty() {
            return Ok(CallToolResult::error(vec![Content::text(
                "Question must not be empty",
            )]));
        }

        let request_id = Uuid::new_v4().to_string();
        let text = match self.pipeline.qa().ask(&request_id, question.trim()).await {
            Ok(answer) => describe_answer(&answer),
            Err(e) => {
                tracing::warn!(request_id = %request_id, "QA unavailable: {}", e);
                "Could not retrieve an answer at this time.".to_string()
            }
        };

        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

#[tool_handler]
impl ServerHandler for VerifaceMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "veriface-mcp-server".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Veriface MCP Server - identifies people from images and answers \
                 university regulations questions"
                    .into(),
            ),
        }
    }
}

fn decode_image(image_b64: &str) -> crate::types::Result<Vec<u8>> {
    let image = STANDARD
        .decode(image_b64.trim())
        .map_err(|e| AppError::InvalidInput(format!("image_b64 is not valid base64: {}", e)))?;
    if image.is_empty() {
        return Err(AppError::InvalidInput("Image is empty".to_string()));
    }
    Ok(image)
}

/// MIME type from the image's magic bytes.
fn sniff_mime(image: &[u8]) -> Option<&'static str> {
    if image.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if image.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else {
        None
    }
}

/// One-line verdict for assistant consumption.
pub fn describe_verdict(result: &PipelineResult) -> String {
    let identity = &result.verdict.identity;
    let name = identity.name.as_deref().unwrap_or("unknown");
    match result.verdict.decision {
        Decision::Identified => format!("Identified as {} (Score: {:.2})", name, identity.score),
        Decision::Ambiguous => format!(
            "Ambiguous result. Top candidate: {} ({:.2})",
            name, identity.score
        ),
        Decision::Unknown => "Unknown person.".to_string(),
    }
}

pub fn describe_answer(answer: &QaAnswer) -> String {
    let citations: Vec<String> = answer
        .citations
        .iter()
        .map(|c| match &c.page {
            Some(page) => format!("- {} (Page {})", c.doc, page),
            None => format!("- {}", c.doc),
        })
        .collect();

    format!(
        "Answer: {}\n\nCitations:\n{}",
        answer.text,
        citations.join("\n")
    )
}

/// Serve the MCP tools over stdio until the client disconnects
pub async fn start_stdio_server(
    pipeline: Arc<PipelineCoordinator>,
) -> crate::types::Result<()> {
    use rmcp::{ServiceExt, transport::io::stdio};

    let server = VerifaceMcpServer::new(pipeline);
    let transport = stdio();

    let service = server
        .serve(transport)
        .await
        .map_err(|e| AppError::Internal(format!("MCP server error: {}", e)))?;
    service
        .waiting()
        .await
        .map_err(|e| AppError::Internal(format!("MCP server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candidate, Citation, FusionVerdict, Identity};

    fn result(decision: Decision, name: Option<&str>, score: f64) -> PipelineResult {
        PipelineResult {
            request_id: "r-1".to_string(),
            verdict: FusionVerdict {
                decision,
                identity: Identity {
                    name: name.map(str::to_string),
                    score,
                },
                candidates: Vec::<Candidate>::new(),
            },
            normativa_answer: None,
            timing_ms: 12.0,
            agents: Default::default(),
            qa_used: false,
        }
    }

    #[test]
    fn test_describe_verdict() {
        assert_eq!(
            describe_verdict(&result(Decision::Identified, Some("Ana"), 0.912)),
            "Identified as Ana (Score: 0.91)"
        );
        assert_eq!(
            describe_verdict(&result(Decision::Ambiguous, Some("Luis"), 0.851)),
            "Ambiguous result. Top candidate: Luis (0.85)"
        );
        assert_eq!(
            describe_verdict(&result(Decision::Unknown, None, 0.2)),
            "Unknown person."
        );
    }

    #[test]
    fn test_describe_answer_lists_citations() {
        let answer = QaAnswer {
            text: "Opens at 8am.".to_string(),
            citations: vec![
                Citation {
                    doc: "reglamento.pdf".to_string(),
                    page: Some("3".to_string()),
                    url: None,
                },
                Citation {
                    doc: "horarios.pdf".to_string(),
                    page: None,
                    url: None,
                },
            ],
        };

        assert_eq!(
            describe_answer(&answer),
            "Answer: Opens at 8am.\n\nCitations:\n- reglamento.pdf (Page 3)\n- horarios.pdf"
        );
    }

    #[test]
    fn test_decode_image_rejects_garbage() {
        assert!(decode_image("not base64!").is_err());
        assert!(decode_image("").is_err());
        assert_eq!(decode_image(" AQID ").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_mime(b"\x89PNG\r\n\x1a\n...."), Some("image/png"));
        assert_eq!(sniff_mime(b"GIF89a"), None);
    }
}
