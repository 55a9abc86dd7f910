//! Domain service for account management.
//!
//! CRUD over accounts for authenticated callers. Registration lives in the
//! auth service because it also issues a token.

use thiserror::Error;

use crate::db::StoreError;
use crate::models::account::Account;
use crate::services::account_validator::{
    AccountPayload, FieldErrors, ValidationMode, duplicate_message,
};

/// Errors specific to account operations.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Account {0} not found")]
    NotFound(i32),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AccountError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AccountError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<StoreError> for AccountError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(field) => {
                Self::Validation(FieldErrors::single(field.as_str(), duplicate_message(field)))
            }
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Database(e) => Self::Database(e.to_string()),
            StoreError::Internal(e) => Self::Internal(e.to_string()),
        }
    }
}

/// Domain service trait for accounts.
#[async_trait::async_trait]
pub trait AccountService: Send + Sync {
    /// Lists every account, ordered by id.
    async fn list(&self) -> Result<Vec<Account>, AccountError>;

    /// Gets a single account.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::NotFound`] for an unknown id.
    async fn get(&self, id: i32) -> Result<Account, AccountError>;

    /// Creates an account without issuing a token.
    async fn create(&self, payload: AccountPayload) -> Result<Account, AccountError>;

    /// Applies a full (`Replace`) or partial update.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::Validation`] with per-field messages when the
    /// payload is rejected, [`AccountError::NotFound`] for an unknown id.
    async fn update(
        &self,
        id: i32,
        payload: AccountPayload,
        mode: ValidationMode,
    ) -> Result<Account, AccountError>;

    /// Deletes an account and its token.
    async fn delete(&self, id: i32) -> Result<(), AccountError>;
}
