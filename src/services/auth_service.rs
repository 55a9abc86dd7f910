//! Domain service for registration, login and token authentication.

use serde::Serialize;
use thiserror::Error;

use crate::db::StoreError;
use crate::models::account::{Account, AuthToken};
use crate::services::account_service::AccountError;
use crate::services::account_validator::AccountPayload;

/// Errors specific to authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Username and password are required")]
    MissingCredentials,

    #[error("Invalid Credentials")]
    InvalidCredentials,

    /// Token authentication failed; the message is shown to the client.
    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("Account rejected: {0}")]
    Account(#[from] AccountError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AuthError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        Self::Account(err.into())
    }
}

pub const INVALID_TOKEN: &str = "Invalid token.";
pub const INACTIVE_ACCOUNT: &str = "User inactive or deleted.";

/// Token handed back by register and login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthGrant {
    pub token: String,
    pub user_id: i32,
}

impl AuthGrant {
    #[must_use]
    pub fn new(token: AuthToken) -> Self {
        Self {
            user_id: token.account_id,
            token: token.key,
        }
    }
}

/// Domain service trait for authentication.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Validates and creates a new account, issuing its token in the same
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Account`] wrapping per-field validation messages.
    async fn register(&self, payload: AccountPayload) -> Result<AuthGrant, AuthError>;

    /// Verifies credentials and returns the account's token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingCredentials`] when either value is absent
    /// or empty, [`AuthError::InvalidCredentials`] if login fails.
    async fn login(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<AuthGrant, AuthError>;

    /// Resolves a presented token to an active account.
    async fn authenticate(&self, key: &str) -> Result<Account, AuthError>;

    /// Returns the account's token, creating it on first use.
    async fn issue_or_get_token(&self, account_id: i32) -> Result<AuthToken, AuthError>;
}
