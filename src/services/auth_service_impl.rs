//! `SeaORM` implementation of the `AuthService` trait.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::db::Store;
use crate::models::account::{Account, AuthToken};
use crate::services::account_validator::{AccountPayload, AccountValidator};
use crate::services::auth_service::{
    AuthError, AuthGrant, AuthService, INACTIVE_ACCOUNT, INVALID_TOKEN,
};

pub struct SeaOrmAuthService {
    store: Store,
    validator: AccountValidator,
}

impl SeaOrmAuthService {
    #[must_use]
    pub const fn new(store: Store, validator: AccountValidator) -> Self {
        Self { store, validator }
    }
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn register(&self, payload: AccountPayload) -> Result<AuthGrant, AuthError> {
        let mut new = self.validator.validate_new(payload).await?;

        // Self-registration never grants privileges.
        new.is_active = true;
        new.is_staff = false;

        let (account, token) = self.store.create_account_with_token(new).await?;

        metrics::counter!("accounts_registered_total").increment(1);
        info!(account_id = account.id, username = %account.username, "Account registered");

        Ok(AuthGrant::new(token))
    }

    async fn login(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<AuthGrant, AuthError> {
        let (Some(username), Some(password)) = (
            username.filter(|u| !u.is_empty()),
            password.filter(|p| !p.is_empty()),
        ) else {
            return Err(AuthError::MissingCredentials);
        };

        let Some(account) = self
            .store
            .verify_account_password(username, password)
            .await?
        else {
            metrics::counter!("logins_total", "outcome" => "rejected").increment(1);
            warn!(username = %username, "Login rejected");
            return Err(AuthError::InvalidCredentials);
        };

        let token = self.issue_or_get_token(account.id).await?;

        metrics::counter!("logins_total", "outcome" => "success").increment(1);
        info!(account_id = account.id, "Login succeeded");

        Ok(AuthGrant::new(token))
    }

    async fn authenticate(&self, key: &str) -> Result<Account, AuthError> {
        let account = self
            .store
            .account_for_token(key)
            .await?
            .ok_or(AuthError::Unauthorized(INVALID_TOKEN))?;

        if !account.is_active {
            return Err(AuthError::Unauthorized(INACTIVE_ACCOUNT));
        }

        Ok(account)
    }

    async fn issue_or_get_token(&self, account_id: i32) -> Result<AuthToken, AuthError> {
        Ok(self.store.issue_token(account_id).await?)
    }
}
