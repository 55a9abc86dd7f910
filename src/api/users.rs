use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use std::sync::Arc;
use tracing::info;

use super::auth::CurrentAccount;
use super::{AccountDto, ApiError, AppState};
use crate::services::{AccountPayload, ValidationMode};

/// Ids that are not valid account keys name no account.
fn parse_account_id(raw: &str) -> Result<i32, ApiError> {
    raw.parse().map_err(|_| ApiError::not_found("Account", raw))
}

/// GET /users/
pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AccountDto>>, ApiError> {
    let accounts = state.accounts().list().await?;

    Ok(Json(accounts.into_iter().map(AccountDto::from).collect()))
}

/// POST /users/
/// Create an account on behalf of an authenticated caller (no token issued)
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(CurrentAccount(actor)): Extension<CurrentAccount>,
    payload: Result<Json<AccountPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<AccountDto>), ApiError> {
    let Json(payload) = payload?;

    let account = state.accounts().create(payload).await?;
    info!(actor_id = actor.id, account_id = account.id, "Account provisioned");

    Ok((StatusCode::CREATED, Json(account.into())))
}

/// GET /users/{id}/
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Json<AccountDto>, ApiError> {
    let id = parse_account_id(&raw_id)?;
    let account = state.accounts().get(id).await?;

    Ok(Json(account.into()))
}

/// PUT /users/{id}/
pub async fn replace_user(
    State(state): State<Arc<AppState>>,
    Extension(CurrentAccount(actor)): Extension<CurrentAccount>,
    Path(raw_id): Path<String>,
    payload: Result<Json<AccountPayload>, JsonRejection>,
) -> Result<Json<AccountDto>, ApiError> {
    let id = parse_account_id(&raw_id)?;
    let Json(payload) = payload?;

    let account = state
        .accounts()
        .update(id, payload, ValidationMode::Replace)
        .await?;
    info!(actor_id = actor.id, account_id = id, "Account replaced");

    Ok(Json(account.into()))
}

/// PATCH /users/{id}/
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(CurrentAccount(actor)): Extension<CurrentAccount>,
    Path(raw_id): Path<String>,
    payload: Result<Json<AccountPayload>, JsonRejection>,
) -> Result<Json<AccountDto>, ApiError> {
    let id = parse_account_id(&raw_id)?;
    let Json(payload) = payload?;

    let account = state
        .accounts()
        .update(id, payload, ValidationMode::Partial)
        .await?;
    info!(actor_id = actor.id, account_id = id, "Account updated");

    Ok(Json(account.into()))
}

/// DELETE /users/{id}/
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(CurrentAccount(actor)): Extension<CurrentAccount>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_account_id(&raw_id)?;
    state.accounts().delete(id).await?;
    info!(actor_id = actor.id, account_id = id, "Account removed");

    Ok(StatusCode::NO_CONTENT)
}
