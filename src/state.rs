use std::sync::Arc;

use crate::config::Config;
use crate::db::Store;
use crate::services::{
    AccountService, AccountValidator, AuthService, PasswordPolicy, SeaOrmAccountService,
    SeaOrmAuthService,
};

/// Long-lived dependencies shared by every request handler.
#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<Config>,

    pub store: Store,

    pub account_service: Arc<dyn AccountService>,

    pub auth_service: Arc<dyn AuthService>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_url,
            config.general.max_db_connections,
            config.general.min_db_connections,
            config.security.clone(),
        )
        .await?;

        Self::with_store(config, store)
    }

    /// Wires the services around an already opened store.
    pub fn with_store(config: Config, store: Store) -> anyhow::Result<Self> {
        let password_policy = PasswordPolicy::from_config(&config.password_policy)?;
        let validator = AccountValidator::new(store.clone(), Arc::new(password_policy));

        let account_service = Arc::new(SeaOrmAccountService::new(
            store.clone(),
            validator.clone(),
        )) as Arc<dyn AccountService>;

        let auth_service =
            Arc::new(SeaOrmAuthService::new(store.clone(), validator)) as Arc<dyn AuthService>;

        Ok(Self {
            config: Arc::new(config),
            store,
            account_service,
            auth_service,
        })
    }
}
