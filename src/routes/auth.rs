/**
 * Authentication Routes
 * JWT-based authentication with register, login, verify, refresh, and logout
 */
use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::routes::{ErrorResponse, SuccessResponse};

// ============================================================================
// Configuration
// ============================================================================

lazy_static::lazy_static! {
    /// JWT signing secret from environment
    pub static ref JWT_SECRET: String = std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "default-jwt-secret-change-in-production".to_string());

    /// Rate limit storage (IP -> last request timestamp)
    static ref RATE_LIMIT: Arc<RwLock<HashMap<String, i64>>> =
        Arc::new(RwLock::new(HashMap::new()));
}

/// Access token expiry (users stay logged in for a day)
const ACCESS_TOKEN_EXPIRY_HOURS: i64 = 24;

/// Refresh token expiry in days
const REFRESH_TOKEN_EXPIRY_DAYS: i64 = 7;

/// Rate limit window in seconds (1 request per IP per 60 seconds for register/login)
#[allow(dead_code)]
const RATE_LIMIT_WINDOW_SECS: i64 = 60;

/// Uniform credential failure message. Unknown username and wrong password
/// must be indistinguishable to the caller.
const INVALID_CREDENTIALS: &str = "Invalid username or password";

// ============================================================================
// Types
// ============================================================================

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,      // User ID
    pub username: String, // Username
    pub exp: i64,         // Expiry timestamp
    pub iat: i64,         // Issued at timestamp
}

impl Claims {
    /// Parse the subject back into a user id.
    pub fn user_id(&self) -> Result<Uuid, uuid::Error> {
        Uuid::parse_str(&self.sub)
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
    pub token: String,
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub message: String,
    pub token: String,
    pub refresh_token: String,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct LogoutRequest {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Generate a random opaque refresh token
fn generate_refresh_token() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 64)
}

/// Hash a refresh token for storage using SHA-256. Only the hash ever
/// touches the database, so a leaked table does not leak usable tokens.
fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Create access token bound to a user
pub fn create_access_token(
    user_id: &Uuid,
    username: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let exp = now + Duration::hours(ACCESS_TOKEN_EXPIRY_HOURS);

    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
}

/// Verify and decode access token
pub fn verify_access_token(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(JWT_SECRET.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Extract bearer token from Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Guard for privileged operations: resolve the bearer token to claims or
/// reject with 401.
pub fn require_auth(headers: &HeaderMap) -> Result<Claims, (StatusCode, Json<ErrorResponse>)> {
    match extract_bearer_token(headers) {
        Some(token) => verify_access_token(&token).map_err(|_| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("Invalid or expired token")),
            )
        }),
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("Authorization required")),
        )),
    }
}

/// Check rate limit for an IP.
///
/// Also removes stale entries from the map on every write so the HashMap
/// does not grow without bound as unique IPs accumulate over time.
async fn check_rate_limit(ip: &str) -> bool {
    #[cfg(test)]
    {
        let _ = ip;
        return true; // Bypass in tests so validation and credentials are exercised
    }

    #[cfg(not(test))]
    {
        let now = Utc::now().timestamp();
        let mut limits = RATE_LIMIT.write().await;

        limits.retain(|_, last| now - *last < RATE_LIMIT_WINDOW_SECS);

        if let Some(last_request) = limits.get(ip) {
            if now - last_request < RATE_LIMIT_WINDOW_SECS {
                return false; // Rate limited
            }
        }

        limits.insert(ip.to_string(), now);
        true // Allowed
    }
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(error))).into_response()
}

/// Pull a non-blank field out of a request or fail with the given message.
fn required_field(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/register
/// Create a new user account and return a fresh access token
pub async fn register(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<RegisterRequest>,
) -> Response {
    let ip = addr.ip().to_string();

    if !check_rate_limit(&ip).await {
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests. Please try again later.",
        );
    }

    // All four fields must be present and non-blank
    let (username, email, password, confirm_password) = match (
        required_field(&payload.username),
        required_field(&payload.email),
        required_field(&payload.password),
        required_field(&payload.confirm_password),
    ) {
        (Some(u), Some(e), Some(p), Some(c)) => (u, e, p, c),
        _ => return error_response(StatusCode::BAD_REQUEST, "All fields are required"),
    };

    if password != confirm_password {
        return error_response(StatusCode::BAD_REQUEST, "Passwords do not match");
    }

    if !email.contains('@') {
        return error_response(StatusCode::BAD_REQUEST, "Invalid email format");
    }

    let pool = match crate::db::get_pool() {
        Some(p) => p,
        None => return error_response(StatusCode::SERVICE_UNAVAILABLE, "Database not available"),
    };

    // Uniqueness pre-check for a friendlier message than a bare constraint error
    let existing: Result<Option<(String, String)>, sqlx::Error> =
        sqlx::query_as("SELECT username, email FROM users WHERE username = $1 OR email = $2")
            .bind(username)
            .bind(email)
            .fetch_optional(pool.as_ref())
            .await;

    match existing {
        Ok(Some((taken_username, _))) => {
            let msg = if taken_username == username {
                "Username already taken"
            } else {
                "Email already registered"
            };
            return error_response(StatusCode::CONFLICT, msg);
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("Database error checking existing users: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    }

    // bcrypt is intentionally CPU-intensive; run it outside the async
    // executor so it doesn't block other in-flight tasks.
    let password_owned = password.to_string();
    let password_hash =
        match tokio::task::spawn_blocking(move || hash(&password_owned, DEFAULT_COST)).await {
            Ok(Ok(h)) => h,
            Ok(Err(e)) => {
                tracing::error!("Failed to hash password: {}", e);
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to process password",
                );
            }
            Err(e) => {
                tracing::error!("spawn_blocking panic during hash: {}", e);
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to process password",
                );
            }
        };

    let inserted: Result<(Uuid,), sqlx::Error> = sqlx::query_as(
        r#"
        INSERT INTO users (username, email, password_hash)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(username)
    .bind(email)
    .bind(&password_hash)
    .fetch_one(pool.as_ref())
    .await;

    let user_id = match inserted {
        Ok((id,)) => id,
        Err(e) => {
            // Lost the race against a concurrent registration
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    let msg = if db_err.constraint().is_some_and(|c| c.contains("email")) {
                        "Email already registered"
                    } else {
                        "Username already taken"
                    };
                    return error_response(StatusCode::CONFLICT, msg);
                }
            }
            tracing::error!("Failed to create user: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create account");
        }
    };

    let token = match create_access_token(&user_id, username) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Failed to create access token: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create token");
        }
    };

    tracing::info!("User registered successfully: {}", username);

    (
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
            token,
        }),
    )
        .into_response()
}

/// POST /api/login
/// Authenticate user and return access + refresh tokens
pub async fn login(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<LoginRequest>,
) -> Response {
    let ip = addr.ip().to_string();

    if !check_rate_limit(&ip).await {
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests. Please try again later.",
        );
    }

    let (username, password) = match (
        required_field(&payload.username),
        required_field(&payload.password),
    ) {
        (Some(u), Some(p)) => (u, p),
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Both username and password are required",
            )
        }
    };

    let pool = match crate::db::get_pool() {
        Some(p) => p,
        None => return error_response(StatusCode::SERVICE_UNAVAILABLE, "Database not available"),
    };

    let row: Result<Option<(Uuid, String, String)>, sqlx::Error> =
        sqlx::query_as("SELECT id, username, password_hash FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(pool.as_ref())
            .await;

    let (user_id, username, password_hash) = match row {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::warn!("Login attempt for unknown user");
            return error_response(StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS);
        }
        Err(e) => {
            tracing::error!("Database error during login: {}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Authentication service temporarily unavailable",
            );
        }
    };

    // Verify password off the async executor; bcrypt is CPU-bound.
    let password_owned = password.to_string();
    let hash_clone = password_hash.clone();
    let password_ok =
        tokio::task::spawn_blocking(move || verify(&password_owned, &hash_clone).unwrap_or(false))
            .await
            .unwrap_or(false);
    if !password_ok {
        tracing::warn!("Failed login attempt for: {}", username);
        return error_response(StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS);
    }

    let token = match create_access_token(&user_id, &username) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Failed to create access token: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create token");
        }
    };

    let refresh_token = generate_refresh_token();
    let refresh_token_hash = hash_refresh_token(&refresh_token);
    let expires_at = Utc::now() + Duration::days(REFRESH_TOKEN_EXPIRY_DAYS);

    if let Err(e) = sqlx::query(
        r#"INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
           VALUES ($1, $2, $3)"#,
    )
    .bind(user_id)
    .bind(&refresh_token_hash)
    .bind(expires_at)
    .execute(pool.as_ref())
    .await
    {
        tracing::error!("Failed to persist refresh token: {}", e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create token");
    }

    tracing::info!("Successful login for user: {}", username);

    (
        StatusCode::OK,
        Json(LoginResponse {
            message: "Login successful".to_string(),
            token,
            refresh_token,
            username,
        }),
    )
        .into_response()
}

/// POST /api/verify
/// Verify access token and return the bound username
pub async fn verify_token(headers: HeaderMap) -> impl IntoResponse {
    let token = match extract_bearer_token(&headers) {
        Some(t) => t,
        None => {
            return (
                StatusCode::OK,
                Json(VerifyResponse {
                    valid: false,
                    username: None,
                    error: Some("No authorization token provided".to_string()),
                }),
            );
        }
    };

    match verify_access_token(&token) {
        Ok(claims) => (
            StatusCode::OK,
            Json(VerifyResponse {
                valid: true,
                username: Some(claims.username),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::debug!("Token verification failed: {}", e);
            (
                StatusCode::OK,
                Json(VerifyResponse {
                    valid: false,
                    username: None,
                    error: Some("Invalid or expired token".to_string()),
                }),
            )
        }
    }
}

/// POST /api/refresh
/// Exchange a refresh token for a new access token. Rotates the refresh
/// token: the presented token is revoked and a new one issued.
pub async fn refresh(Json(payload): Json<RefreshRequest>) -> Response {
    if payload.refresh_token.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Refresh token is required");
    }

    let pool = match crate::db::get_pool() {
        Some(p) => p,
        None => return error_response(StatusCode::SERVICE_UNAVAILABLE, "Database not available"),
    };

    let token_hash = hash_refresh_token(&payload.refresh_token);
    let now = Utc::now();

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            tracing::error!("Failed to begin transaction for token refresh: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    // Claim the token in a single UPDATE so two concurrent redemptions of
    // the same token cannot both pass a separate validity check. Exactly one
    // request flips revoked and gets the user_id back; the loser sees zero
    // rows and is rejected.
    let claimed: Result<Option<(Uuid,)>, sqlx::Error> = sqlx::query_as(
        r#"UPDATE refresh_tokens
           SET revoked = true
           WHERE token_hash = $1 AND NOT revoked AND expires_at > $2
           RETURNING user_id"#,
    )
    .bind(&token_hash)
    .bind(now)
    .fetch_optional(&mut *tx)
    .await;

    let user_id = match claimed {
        Ok(Some((user_id,))) => user_id,
        Ok(None) => {
            return error_response(StatusCode::UNAUTHORIZED, "Invalid or expired refresh token")
        }
        Err(e) => {
            tracing::error!("DB error during token refresh claim: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    let row: Result<(String,), sqlx::Error> =
        sqlx::query_as("SELECT username FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await;

    let (username,) = match row {
        Ok(row) => row,
        Err(e) => {
            tracing::error!("DB error loading user during token refresh: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    let token = match create_access_token(&user_id, &username) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Failed to create access token: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create token");
        }
    };

    // Issue the replacement inside the same transaction; an early return
    // above drops the transaction and rolls the revocation back, so a
    // failed rotation never strands the caller without a usable token.
    let new_refresh_token = generate_refresh_token();
    let new_token_hash = hash_refresh_token(&new_refresh_token);
    let new_expires_at = now + Duration::days(REFRESH_TOKEN_EXPIRY_DAYS);

    if let Err(e) = sqlx::query(
        r#"INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
           VALUES ($1, $2, $3)"#,
    )
    .bind(user_id)
    .bind(&new_token_hash)
    .bind(new_expires_at)
    .execute(&mut *tx)
    .await
    {
        tracing::error!("Failed to persist rotated refresh token: {}", e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error");
    }

    if let Err(e) = tx.commit().await {
        tracing::error!("Failed to commit token rotation: {}", e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error");
    }

    (
        StatusCode::OK,
        Json(RefreshResponse {
            token,
            refresh_token: new_refresh_token,
        }),
    )
        .into_response()
}

/// POST /api/logout
/// Revoke refresh token(s). Idempotent; always returns success.
pub async fn logout(headers: HeaderMap, Json(payload): Json<LogoutRequest>) -> impl IntoResponse {
    let pool = crate::db::get_pool();

    // Revoke a specific refresh token if provided
    if let (Some(refresh_token), Some(ref p)) = (payload.refresh_token, &pool) {
        let token_hash = hash_refresh_token(&refresh_token);
        if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = true WHERE token_hash = $1")
            .bind(&token_hash)
            .execute(p.as_ref())
            .await
        {
            // Still return success (logout is idempotent) but leave a trail:
            // an unrevoked token outliving a logout is worth investigating.
            tracing::error!("Failed to revoke refresh token during logout: {}", e);
        }
    }

    // If an access token is provided, revoke ALL refresh tokens for that user
    if let Some(access_token) = payload
        .access_token
        .or_else(|| extract_bearer_token(&headers))
    {
        if let (Ok(claims), Some(ref p)) = (verify_access_token(&access_token), &pool) {
            if let Ok(user_id) = claims.user_id() {
                if let Err(e) =
                    sqlx::query("UPDATE refresh_tokens SET revoked = true WHERE user_id = $1")
                        .bind(user_id)
                        .execute(p.as_ref())
                        .await
                {
                    tracing::error!(
                        "Failed to revoke refresh tokens for user during logout: {}",
                        e
                    );
                }
            }
        }
    }

    (StatusCode::OK, Json(SuccessResponse { success: true }))
}
