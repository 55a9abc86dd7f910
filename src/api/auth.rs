use axum::{
    Json,
    extract::{Request, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::observability::RequestSpan;
use super::{ApiError, AppState, LoginRequest};
use crate::models::account::Account;
use crate::services::{AccountPayload, AuthGrant};

const CREDENTIALS_NOT_PROVIDED: &str = "Authentication credentials were not provided.";
const NO_CREDENTIALS: &str = "Invalid token header. No credentials provided.";
const CONTAINS_SPACES: &str = "Invalid token header. Token string should not contain spaces.";
const INVALID_CHARACTERS: &str =
    "Invalid token header. Token string should not contain invalid characters.";

/// Identity resolved by [`auth_middleware`], available to protected handlers
/// through `Extension<CurrentAccount>`.
#[derive(Debug, Clone)]
pub struct CurrentAccount(pub Account);

// ============================================================================
// Middleware
// ============================================================================

/// Requires `Authorization: <keyword> <token>` and attaches the owning
/// account to the request.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let keyword = state.config().tokens.header_keyword.as_str();

    let key = extract_token(request.headers(), keyword)
        .map_err(|message| ApiError::unauthorized(message).with_challenge(keyword))?;

    let account = state
        .auth()
        .authenticate(&key)
        .await
        .map_err(|e| ApiError::from(e).with_challenge(keyword))?;

    if let Some(RequestSpan(span)) = request.extensions().get::<RequestSpan>() {
        span.record("user_id", account.id);
    }
    request.extensions_mut().insert(CurrentAccount(account));

    Ok(next.run(request).await)
}

/// Pulls the token out of the `Authorization` header.
///
/// A header using another scheme counts as no credentials at all.
pub fn extract_token(headers: &HeaderMap, keyword: &str) -> Result<String, &'static str> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Err(CREDENTIALS_NOT_PROVIDED);
    };

    let value = value.to_str().map_err(|_| INVALID_CHARACTERS)?;
    let mut parts = value.split_whitespace();

    match parts.next() {
        Some(scheme) if scheme.eq_ignore_ascii_case(keyword) => {}
        _ => return Err(CREDENTIALS_NOT_PROVIDED),
    }

    let Some(key) = parts.next() else {
        return Err(NO_CREDENTIALS);
    };

    if parts.next().is_some() {
        return Err(CONTAINS_SPACES);
    }

    Ok(key.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /users/register/
/// Create an account and return its token
pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AccountPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthGrant>), ApiError> {
    let Json(payload) = payload?;

    let grant = state.auth().register(payload).await?;

    Ok((StatusCode::CREATED, Json(grant)))
}

/// POST /users/login/
/// Authenticate with username and password, returns the account token
pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthGrant>, ApiError> {
    // An unreadable body carries no credentials.
    let payload = payload.map(|Json(p)| p).unwrap_or_default();

    let grant = state
        .auth()
        .login(payload.username.as_deref(), payload.password.as_deref())
        .await?;

    Ok(Json(grant))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(
            extract_token(&headers("Token abc123"), "Token"),
            Ok("abc123".to_string())
        );
        assert_eq!(
            extract_token(&headers("token   abc123"), "Token"),
            Ok("abc123".to_string())
        );
    }

    #[test]
    fn test_extract_token_failures() {
        assert_eq!(
            extract_token(&HeaderMap::new(), "Token"),
            Err(CREDENTIALS_NOT_PROVIDED)
        );
        assert_eq!(
            extract_token(&headers("Bearer abc123"), "Token"),
            Err(CREDENTIALS_NOT_PROVIDED)
        );
        assert_eq!(extract_token(&headers("Token"), "Token"), Err(NO_CREDENTIALS));
        assert_eq!(
            extract_token(&headers("Token abc 123"), "Token"),
            Err(CONTAINS_SPACES)
        );
    }

    #[test]
    fn test_extract_token_custom_keyword() {
        assert_eq!(
            extract_token(&headers("Bearer abc123"), "Bearer"),
            Ok("abc123".to_string())
        );
    }
}
