use crate::{
    AppState,
    types::{AppError, IdentifyRequest, PipelineResult, Result, UserContext},
    utils::toml_config::LimitsConfig,
};
use axum::{
    Json,
    extract::{ConnectInfo, FromRequestParts, Multipart, State, multipart::MultipartError},
    http::{HeaderMap, StatusCode, request::Parts},
};
use std::net::SocketAddr;
use utoipa::ToSchema;

/// Multipart form accepted by `/identify-and-answer` (documentation only).
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct IdentifyForm {
    /// JPEG or PNG image
    #[schema(value_type = String, format = Binary)]
    image: Vec<u8>,
    /// Optional question for the regulations QA service
    question: Option<String>,
}

/// Identify the person in an image and optionally answer their question
#[utoipa::path(
    post,
    path = "/identify-and-answer",
    request_body(content = IdentifyForm, content_type = "multipart/form-data"),
    params(
        ("x-user-id" = Option<String>, Header, description = "Caller identifier"),
        ("x-user-type" = Option<String>, Header, description = "Caller category, e.g. student or staff")
    ),
    responses(
        (status = 200, description = "Identification result", body = PipelineResult),
        (status = 400, description = "Missing or unreadable image"),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "Image too large"),
        (status = 415, description = "Unsupported image type"),
        (status = 504, description = "Too many verification agents failed")
    ),
    tag = "identify",
    security(("bearer" = []))
)]
pub async fn identify_and_answer(
    State(state): State<AppState>,
    ClientAddr(client_addr): ClientAddr,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<PipelineResult>> {
    let limits = state.config_manager.config().limits.clone();

    let mut image: Option<(Vec<u8>, Option<String>)> = None;
    let mut question: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("image") => {
                let mime_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                image = Some((bytes.to_vec(), mime_type));
            }
            Some("question") => {
                question = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let (image, mime_type) =
        image.ok_or_else(|| AppError::InvalidInput("Missing 'image' field".to_string()))?;
    validate_image(&limits, mime_type.as_deref(), image.len())?;

    let user = UserContext::new(
        header_value(&headers, "x-user-id"),
        header_value(&headers, "x-user-type"),
    );
    tracing::info!(
        user_id = user.id.as_deref().unwrap_or("-"),
        user_type = user.user_type.as_deref().unwrap_or("-"),
        size_bytes = image.len(),
        "Received identify request"
    );

    let mut request = IdentifyRequest::new(image).with_user(user);
    request.question = question;
    request.mime_type = mime_type;
    request.client_addr = client_addr;

    let result = state.pipeline.handle_detached(request).await?;
    Ok(Json(result))
}

/// Reject images whose MIME type or size is outside the configured limits.
pub fn validate_image(limits: &LimitsConfig, mime_type: Option<&str>, size: usize) -> Result<()> {
    let essence = mime_type
        .and_then(|m| m.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase());

    let allowed = essence
        .as_deref()
        .is_some_and(|m| limits.allowed_mime_types.iter().any(|a| a.eq_ignore_ascii_case(m)));
    if !allowed {
        return Err(AppError::UnsupportedMediaType(format!(
            "Unsupported Media Type. Allowed: {}",
            limits.allowed_mime_types.join(", ")
        )));
    }

    if size == 0 {
        return Err(AppError::InvalidInput("Image is empty".to_string()));
    }

    if size > limits.max_image_bytes {
        return Err(AppError::PayloadTooLarge(format!(
            "Payload too large. Max size is {} bytes.",
            limits.max_image_bytes
        )));
    }

    Ok(())
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(err.body_text())
    } else {
        AppError::InvalidInput(err.body_text())
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Caller address: first `x-forwarded-for` hop, else the socket peer.
pub struct ClientAddr(pub Option<String>);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let addr = forwarded.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

        Ok(ClientAddr(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn limits() -> LimitsConfig {
        LimitsConfig {
            max_image_bytes: 100,
            allowed_mime_types: vec!["image/jpeg".to_string(), "image/png".to_string()],
        }
    }

    #[rstest]
    #[case(Some("image/png"), 10)]
    #[case(Some("image/jpeg"), 100)]
    #[case(Some("IMAGE/PNG; q=1"), 1)]
    fn test_accepts_valid_images(#[case] mime: Option<&str>, #[case] size: usize) {
        assert!(validate_image(&limits(), mime, size).is_ok());
    }

    #[test]
    fn test_rejects_unsupported_type() {
        let err = validate_image(&limits(), Some("image/gif"), 10).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let err = validate_image(&limits(), None, 10).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn test_rejects_oversized_image() {
        let err = validate_image(&limits(), Some("image/png"), 101).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_rejects_empty_image() {
        let err = validate_image(&limits(), Some("image/png"), 0).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
