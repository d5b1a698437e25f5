/**
 * Blog Routes
 * Saving generated drafts and listing the caller's saved posts
 */
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{self, models::BlogPost};
use crate::routes::{auth::require_auth, ErrorResponse};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct SaveBlogRequest {
    pub title: Option<String>,
    pub content: Option<String>,
}

/// Saved post as returned to the client
#[derive(Debug, Serialize, Deserialize)]
pub struct BlogPostResponse {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<BlogPost> for BlogPostResponse {
    fn from(post: BlogPost) -> Self {
        Self {
            id: post.id,
            title: post.title,
            content: post.content,
            created_at: post.created_at,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/save-blog - Persist a generated draft for the caller (auth required)
///
/// Validation and auth run before any write; a rejected request leaves no row.
pub async fn save_blog(headers: HeaderMap, Json(payload): Json<SaveBlogRequest>) -> Response {
    let claims = match require_auth(&headers) {
        Ok(c) => c,
        Err(err_response) => return err_response.into_response(),
    };

    let title = payload.title.as_deref().map(str::trim).unwrap_or_default();
    let content = payload
        .content
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();

    if title.is_empty() || content.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Title and content are required")),
        )
            .into_response();
    }

    let author_id = match claims.user_id() {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("Invalid or expired token")),
            )
                .into_response();
        }
    };

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new("Database not available")),
            )
                .into_response();
        }
    };

    match sqlx::query_as::<_, BlogPost>(
        r#"
        INSERT INTO blog_posts (author_id, title, content)
        VALUES ($1, $2, $3)
        RETURNING id, author_id, title, content, created_at
        "#,
    )
    .bind(author_id)
    .bind(title)
    .bind(content)
    .fetch_one(pool.as_ref())
    .await
    {
        Ok(post) => {
            tracing::info!(user = %claims.username, post_id = %post.id, "blog post saved");
            (StatusCode::CREATED, Json(BlogPostResponse::from(post))).into_response()
        }
        Err(e) => {
            tracing::error!("Database error saving blog post: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to save post")),
            )
                .into_response()
        }
    }
}

/// GET /api/blogs - List the caller's saved posts, newest first (auth required)
pub async fn list_blogs(headers: HeaderMap) -> Response {
    let claims = match require_auth(&headers) {
        Ok(c) => c,
        Err(err_response) => return err_response.into_response(),
    };

    let author_id = match claims.user_id() {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("Invalid or expired token")),
            )
                .into_response();
        }
    };

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new("Database not available")),
            )
                .into_response();
        }
    };

    // Scoped to the caller: one author never sees another's posts
    match sqlx::query_as::<_, BlogPost>(
        r#"
        SELECT id, author_id, title, content, created_at
        FROM blog_posts
        WHERE author_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(author_id)
    .fetch_all(pool.as_ref())
    .await
    {
        Ok(posts) => {
            let items: Vec<BlogPostResponse> =
                posts.into_iter().map(BlogPostResponse::from).collect();
            (StatusCode::OK, Json(items)).into_response()
        }
        Err(e) => {
            tracing::error!("Database error listing blog posts: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to fetch posts")),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::auth::create_access_token;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::{get, post};
    use axum::Router;
    use tower::ServiceExt;

    fn blog_router() -> Router {
        Router::new()
            .route("/api/save-blog", post(save_blog))
            .route("/api/blogs", get(list_blogs))
    }

    fn bearer() -> String {
        format!(
            "Bearer {}",
            create_access_token(&Uuid::new_v4(), "alice").unwrap()
        )
    }

    async fn send(
        app: Router,
        req: Request<Body>,
    ) -> (StatusCode, axum::body::Bytes) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes)
    }

    #[tokio::test]
    async fn test_save_without_token_returns_unauthorized() {
        let req = Request::post("/api/save-blog")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&SaveBlogRequest {
                    title: Some("Cats".to_string()),
                    content: Some("A blog about cats.".to_string()),
                })
                .unwrap(),
            ))
            .unwrap();
        let (status, _) = send(blog_router(), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_save_with_garbage_token_returns_unauthorized() {
        let req = Request::post("/api/save-blog")
            .header("content-type", "application/json")
            .header("authorization", "Bearer not.a.jwt")
            .body(Body::from(
                serde_json::to_vec(&SaveBlogRequest {
                    title: Some("Cats".to_string()),
                    content: Some("A blog about cats.".to_string()),
                })
                .unwrap(),
            ))
            .unwrap();
        let (status, _) = send(blog_router(), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_save_missing_content_returns_bad_request() {
        let req = Request::post("/api/save-blog")
            .header("content-type", "application/json")
            .header("authorization", bearer())
            .body(Body::from(
                serde_json::to_vec(&SaveBlogRequest {
                    title: Some("Cats".to_string()),
                    content: None,
                })
                .unwrap(),
            ))
            .unwrap();
        let (status, bytes) = send(blog_router(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "Title and content are required");
    }

    #[tokio::test]
    async fn test_save_blank_title_returns_bad_request() {
        let req = Request::post("/api/save-blog")
            .header("content-type", "application/json")
            .header("authorization", bearer())
            .body(Body::from(
                serde_json::to_vec(&SaveBlogRequest {
                    title: Some("   ".to_string()),
                    content: Some("A blog about cats.".to_string()),
                })
                .unwrap(),
            ))
            .unwrap();
        let (status, _) = send(blog_router(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_without_token_returns_unauthorized() {
        let req = Request::get("/api/blogs").body(Body::empty()).unwrap();
        let (status, _) = send(blog_router(), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_save_without_database_returns_unavailable() {
        // Auth and validation pass; the missing pool is hit last, so no
        // partial write can have happened earlier either.
        let req = Request::post("/api/save-blog")
            .header("content-type", "application/json")
            .header("authorization", bearer())
            .body(Body::from(
                serde_json::to_vec(&SaveBlogRequest {
                    title: Some("Cats".to_string()),
                    content: Some("A blog about cats.".to_string()),
                })
                .unwrap(),
            ))
            .unwrap();
        let (status, _) = send(blog_router(), req).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
