//! Bearer-token guard for HTTP routes.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Expected token; `None` leaves routes open.
#[derive(Clone, Default)]
pub struct BearerToken(pub Option<Arc<str>>);

impl BearerToken {
    pub fn new(token: Option<&str>) -> Self {
        Self(token.filter(|t| !t.is_empty()).map(Arc::from))
    }

    /// Whether an `Authorization` header value carries the expected token.
    pub fn accepts(&self, header_value: Option<&str>) -> bool {
        let Some(expected) = &self.0 else {
            return true;
        };
        header_value
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|presented| presented.trim() == expected.as_ref())
    }
}

/// Reject requests without a matching `Authorization: Bearer` header.
pub async fn require_bearer(
    State(token): State<BearerToken>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if token.accepts(presented) {
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "Rejected unauthenticated request");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "unauthorized" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_when_unconfigured() {
        assert!(BearerToken::new(None).accepts(None));
        assert!(BearerToken::new(Some("")).accepts(None));
    }

    #[test]
    fn test_requires_exact_token() {
        let token = BearerToken::new(Some("s3cret"));
        assert!(token.accepts(Some("Bearer s3cret")));
        assert!(!token.accepts(Some("Bearer other")));
        assert!(!token.accepts(Some("s3cret")));
        assert!(!token.accepts(None));
    }
}
