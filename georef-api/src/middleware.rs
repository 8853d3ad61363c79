//! Request Middleware
//!
//! - Correlation: requests to the manager's `/v1/localities*` and
//!   `/v1/streets` routes must carry a UUID `X-Correlation-ID`, which is
//!   recorded on the request span and echoed back on the response.
//! - Cancellation: every request gets a `CancellationToken` that fires if
//!   the request future is dropped before it completes.

use std::convert::Infallible;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::gateway::{InvocationContext, CORRELATION_HEADER};

/// Body returned when a protected route lacks a usable correlation id.
pub const INVALID_CORRELATION_MESSAGE: &str = "Invalid or missing Correlation ID";

const CORRELATED_PREFIXES: [&str; 2] = ["/v1/localities", "/v1/streets"];

/// Validated correlation id of the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

/// Cancellation token of the current request.
#[derive(Debug, Clone)]
pub struct RequestCancellation(pub CancellationToken);

fn requires_correlation(path: &str) -> bool {
    let path = path.to_lowercase();
    CORRELATED_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

fn rejection() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": INVALID_CORRELATION_MESSAGE })),
    )
        .into_response()
}

/// Validate, record and echo the correlation id.
pub async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let header = request.headers().get(CORRELATION_HEADER).cloned();
    let parsed = header
        .as_ref()
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok());

    if requires_correlation(request.uri().path()) && parsed.is_none() {
        tracing::warn!(
            path = %request.uri().path(),
            "Rejected request with invalid or missing correlation id"
        );
        return rejection();
    }

    if let Some(value) = header.as_ref().and_then(|v| v.to_str().ok()) {
        tracing::Span::current().record("correlation_id", value);
        request
            .extensions_mut()
            .insert(CorrelationId(value.to_string()));
    }

    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

/// Attach a per-request cancellation token.
///
/// The token is canceled when this future is dropped mid-flight, i.e. when
/// the client disconnects; it is left untouched on normal completion.
pub async fn cancellation_middleware(mut request: Request, next: Next) -> Response {
    let token = CancellationToken::new();
    request
        .extensions_mut()
        .insert(RequestCancellation(token.clone()));

    let guard = token.drop_guard();
    let response = next.run(request).await;
    guard.disarm();
    response
}

// ============================================================================
// EXTRACTOR
// ============================================================================

/// Correlation id and cancellation token of the current request.
///
/// Never rejects: outside the middleware stack the context has no
/// correlation id and a fresh, never-canceled token.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub correlation_id: Option<String>,
    pub cancel: CancellationToken,
}

impl RequestContext {
    /// Context for calls this request makes to peer tiers.
    pub fn invocation(&self) -> InvocationContext {
        InvocationContext::new(self.correlation_id.clone(), self.cancel.clone())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = parts
            .extensions
            .get::<CorrelationId>()
            .map(|id| id.0.clone());
        let cancel = parts
            .extensions
            .get::<RequestCancellation>()
            .map(|c| c.0.clone())
            .unwrap_or_default();
        Ok(Self {
            correlation_id,
            cancel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware::from_fn, routing::get, Router};
    use tower::ServiceExt;

    const VALID_ID: &str = "3b241101-e2bb-4255-8caf-4136c566a962";

    fn router() -> Router {
        Router::new()
            .route("/v1/localities", get(|| async { "ok" }))
            .route(
                "/health",
                get(|ctx: RequestContext| async move {
                    ctx.correlation_id.unwrap_or_else(|| "none".to_string())
                }),
            )
            .layer(from_fn(correlation_middleware))
            .layer(from_fn(cancellation_middleware))
    }

    fn request(path: &str, correlation: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri(path);
        if let Some(id) = correlation {
            builder = builder.header(CORRELATION_HEADER, id);
        }
        builder.body(Body::empty()).unwrap_or_default()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[test]
    fn test_correlated_prefixes_ignore_case() {
        assert!(requires_correlation("/V1/Localities/5000/streets"));
        assert!(requires_correlation("/v1/streets"));
        assert!(!requires_correlation("/health"));
        assert!(!requires_correlation("/localities"));
    }

    #[tokio::test]
    async fn test_missing_correlation_is_rejected() {
        let response = router()
            .oneshot(request("/v1/localities", None))
            .await
            .unwrap_or_else(|never| match never {});
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_text(response).await,
            r#"{"error":"Invalid or missing Correlation ID"}"#
        );
    }

    #[tokio::test]
    async fn test_malformed_correlation_is_rejected() {
        let response = router()
            .oneshot(request("/v1/localities", Some("not-a-uuid")))
            .await
            .unwrap_or_else(|never| match never {});
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_valid_correlation_is_echoed() {
        let response = router()
            .oneshot(request("/v1/localities", Some(VALID_ID)))
            .await
            .unwrap_or_else(|never| match never {});
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(CORRELATION_HEADER)
                .and_then(|v| v.to_str().ok()),
            Some(VALID_ID)
        );
    }

    #[tokio::test]
    async fn test_unprotected_paths_pass_and_expose_context() {
        let response = router()
            .oneshot(request("/health", None))
            .await
            .unwrap_or_else(|never| match never {});
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "none");

        let response = router()
            .oneshot(request("/health", Some(VALID_ID)))
            .await
            .unwrap_or_else(|never| match never {});
        assert_eq!(body_text(response).await, VALID_ID);
    }

    #[tokio::test]
    async fn test_dropped_request_cancels_token() {
        let (tx, rx) = tokio::sync::oneshot::channel::<CancellationToken>();
        let tx = std::sync::Arc::new(std::sync::Mutex::new(Some(tx)));
        let app = Router::new()
            .route(
                "/slow",
                get(move |ctx: RequestContext| {
                    if let Some(tx) = tx.lock().ok().and_then(|mut slot| slot.take()) {
                        let _ = tx.send(ctx.cancel.clone());
                    }
                    async move {
                        ctx.cancel.cancelled().await;
                        "canceled"
                    }
                }),
            )
            .layer(from_fn(cancellation_middleware));

        let call = tokio::spawn(app.oneshot(request("/slow", None)));
        let token = rx.await.unwrap_or_default();
        assert!(!token.is_cancelled());

        call.abort();
        let _ = call.await;
        assert!(token.is_cancelled());
    }
}
