//! `SeaORM` implementation of the `AccountService` trait.

use async_trait::async_trait;
use tracing::info;

use crate::db::Store;
use crate::models::account::Account;
use crate::services::account_service::{AccountError, AccountService};
use crate::services::account_validator::{AccountPayload, AccountValidator, ValidationMode};

pub struct SeaOrmAccountService {
    store: Store,
    validator: AccountValidator,
}

impl SeaOrmAccountService {
    #[must_use]
    pub const fn new(store: Store, validator: AccountValidator) -> Self {
        Self { store, validator }
    }
}

#[async_trait]
impl AccountService for SeaOrmAccountService {
    async fn list(&self) -> Result<Vec<Account>, AccountError> {
        Ok(self.store.list_accounts().await?)
    }

    async fn get(&self, id: i32) -> Result<Account, AccountError> {
        self.store
            .get_account(id)
            .await?
            .ok_or(AccountError::NotFound(id))
    }

    async fn create(&self, payload: AccountPayload) -> Result<Account, AccountError> {
        let new = self.validator.validate_new(payload).await?;
        let account = self.store.create_account(new).await?;

        info!(account_id = account.id, "Account created");
        Ok(account)
    }

    async fn update(
        &self,
        id: i32,
        payload: AccountPayload,
        mode: ValidationMode,
    ) -> Result<Account, AccountError> {
        let current = self.get(id).await?;
        let changes = self
            .validator
            .validate_changes(&current, payload, mode)
            .await?;

        if changes.is_empty() {
            return Ok(current);
        }

        let password_changed = changes.password.is_some();
        let account = self.store.update_account(id, changes).await?;

        info!(account_id = id, password_changed, "Account updated");
        Ok(account)
    }

    async fn delete(&self, id: i32) -> Result<(), AccountError> {
        self.store.delete_account(id).await?;

        info!(account_id = id, "Account deleted");
        Ok(())
    }
}
