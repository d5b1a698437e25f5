/**
 * Generate Route
 * Orchestrates blog-draft generation: auth, validation, backend invocation.
 */
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::generation::{BlogPrompt, GenerationService};
use crate::routes::{auth::require_auth, ErrorResponse};

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct GenerateBlogRequest {
    pub title: Option<String>,
    pub audience: Option<String>,
    pub word_count: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateBlogResponse {
    pub blog_content: String,
}

/// Whether 500 responses may carry internal error detail
fn debug_errors_enabled() -> bool {
    std::env::var("DEBUG_ERRORS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// POST /api/generate-blog - Generate a blog draft (auth required)
///
/// Validation happens before any backend is invoked; a failed generation is
/// reported immediately with no server-side retry beyond the fallback chain.
pub async fn generate_blog(
    State(service): State<Arc<GenerationService>>,
    headers: HeaderMap,
    Json(payload): Json<GenerateBlogRequest>,
) -> Response {
    let claims = match require_auth(&headers) {
        Ok(c) => c,
        Err(err_response) => return err_response.into_response(),
    };

    let title = payload.title.as_deref().map(str::trim).unwrap_or_default();
    let audience = payload
        .audience
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    let word_count = payload.word_count.unwrap_or(0);

    if title.is_empty() || audience.is_empty() || word_count == 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("All fields are required")),
        )
            .into_response();
    }

    let prompt = BlogPrompt {
        title: title.to_string(),
        audience: audience.to_string(),
        word_count,
    };

    match service.generate(&prompt).await {
        Ok(blog_content) => {
            tracing::info!(
                user = %claims.username,
                title = %prompt.title,
                "blog draft generated"
            );
            (StatusCode::OK, Json(GenerateBlogResponse { blog_content })).into_response()
        }
        Err(e) => {
            tracing::error!(user = %claims.username, error = %e, "blog generation failed");
            let body = if debug_errors_enabled() {
                ErrorResponse::with_message("Blog generation failed", e.to_string())
            } else {
                ErrorResponse::new("Blog generation failed")
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::tests::StaticBackend;
    use crate::routes::auth::create_access_token;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::post;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app(backends: Vec<Box<dyn crate::generation::TextGenerator>>) -> Router {
        let service = Arc::new(GenerationService::new(backends, Duration::from_secs(5)));
        Router::new()
            .route("/api/generate-blog", post(generate_blog))
            .with_state(service)
    }

    fn bearer() -> String {
        format!(
            "Bearer {}",
            create_access_token(&Uuid::new_v4(), "alice").unwrap()
        )
    }

    async fn post_generate(
        app: Router,
        token: Option<&str>,
        body: &GenerateBlogRequest,
    ) -> (StatusCode, axum::body::Bytes) {
        let mut builder = Request::post("/api/generate-blog").header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", token);
        }
        let req = builder
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes)
    }

    fn full_request() -> GenerateBlogRequest {
        GenerateBlogRequest {
            title: Some("Cats".to_string()),
            audience: Some("General".to_string()),
            word_count: Some(300),
        }
    }

    #[tokio::test]
    async fn test_no_token_returns_unauthorized() {
        let (status, _) = post_generate(
            app(vec![Box::new(StaticBackend::ok("draft"))]),
            None,
            &full_request(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_request_returns_content() {
        let token = bearer();
        let (status, bytes) = post_generate(
            app(vec![Box::new(StaticBackend::ok("A blog about cats."))]),
            Some(&token),
            &full_request(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: GenerateBlogResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.blog_content, "A blog about cats.");
    }

    #[tokio::test]
    async fn test_missing_field_rejected_without_invoking_backend() {
        let backend = StaticBackend::ok("draft");
        let calls: std::sync::Arc<AtomicUsize> = backend.calls.clone();
        let token = bearer();

        let (status, _) = post_generate(
            app(vec![Box::new(backend)]),
            Some(&token),
            &GenerateBlogRequest {
                title: Some("Cats".to_string()),
                audience: None,
                word_count: Some(300),
            },
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_word_count_rejected() {
        let token = bearer();
        let (status, _) = post_generate(
            app(vec![Box::new(StaticBackend::ok("draft"))]),
            Some(&token),
            &GenerateBlogRequest {
                title: Some("Cats".to_string()),
                audience: Some("General".to_string()),
                word_count: Some(0),
            },
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_primary_failure_falls_back() {
        let token = bearer();
        let (status, bytes) = post_generate(
            app(vec![
                Box::new(StaticBackend::err("model missing")),
                Box::new(StaticBackend::ok("fallback draft")),
            ]),
            Some(&token),
            &full_request(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: GenerateBlogResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.blog_content, "fallback draft");
    }

    #[tokio::test]
    async fn test_all_backends_failing_returns_server_error() {
        let token = bearer();
        let (status, bytes) = post_generate(
            app(vec![
                Box::new(StaticBackend::err("down")),
                Box::new(StaticBackend::err("also down")),
            ]),
            Some(&token),
            &full_request(),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "Blog generation failed");
    }
}
