use crate::types::{AppError, Result};
use axum::{
    extract::Request,
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Holds the expected API token.
#[derive(Clone)]
pub struct ApiTokenAuth {
    token: String,
}

impl std::fmt::Debug for ApiTokenAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiTokenAuth")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl ApiTokenAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Check the `Authorization` header of a request.
    pub fn verify(&self, headers: &HeaderMap) -> Result<()> {
        let auth_header = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::Auth("Missing bearer token".to_string()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Auth("Missing bearer token".to_string()))?;

        if constant_time_eq(token.as_bytes(), self.token.as_bytes()) {
            Ok(())
        } else {
            Err(AppError::Auth("Invalid API token".to_string()))
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub async fn auth_middleware(
    auth: Arc<ApiTokenAuth>,
    req: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    if let Err(e) = auth.verify(req.headers()) {
        tracing::debug!(path = %req.uri().path(), "Rejected request: {}", e);
        return Err(e);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_accepts_matching_token() {
        let auth = ApiTokenAuth::new("s3cret");
        assert!(auth.verify(&headers_with("Bearer s3cret")).is_ok());
    }

    #[test]
    fn test_rejects_wrong_or_missing_token() {
        let auth = ApiTokenAuth::new("s3cret");
        assert!(matches!(
            auth.verify(&headers_with("Bearer nope")),
            Err(AppError::Auth(_))
        ));
        assert!(matches!(
            auth.verify(&headers_with("Basic s3cret")),
            Err(AppError::Auth(_))
        ));
        assert!(matches!(
            auth.verify(&HeaderMap::new()),
            Err(AppError::Auth(_))
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let auth = ApiTokenAuth::new("s3cret");
        assert!(!format!("{:?}", auth).contains("s3cret"));
    }
}
