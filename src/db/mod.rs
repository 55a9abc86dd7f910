use anyhow::Result;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, SqlxSqliteConnector,
    Statement,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::SecurityConfig;
use crate::models::account::{Account, AccountChanges, AuthToken, NewAccount, UniqueField};

pub mod migrator;
pub mod repositories;

/// Failures of store writes that callers need to tell apart.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("An account with that {0} already exists")]
    Conflict(UniqueField),

    #[error("Account {0} not found")]
    NotFound(i32),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,

    security: SecurityConfig,
}

impl Store {
    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
        security: SecurityConfig,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        let in_memory = db_url.contains(":memory:");

        if db_url.starts_with("sqlite:") && !in_memory {
            let path_str = db_url
                .trim_start_matches("sqlite:")
                .trim_start_matches("//")
                .split('?')
                .next()
                .unwrap_or_default();
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let conn = if in_memory {
            connect_in_memory(db_url).await?
        } else {
            let mut opt = ConnectOptions::new(db_url.to_string());
            opt.max_connections(max_connections)
                .min_connections(min_connections)
                .connect_timeout(Duration::from_secs(10))
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .max_lifetime(Duration::from_secs(600))
                .sqlx_logging(false);

            Database::connect(opt).await?
        };

        migrator::Migrator::up(&conn, None).await?;

        info!(in_memory, "Database connected & migrations applied");

        Ok(Self { conn, security })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn account_repo(&self) -> repositories::account::AccountRepository {
        repositories::account::AccountRepository::new(self.conn.clone(), self.security.clone())
    }

    fn token_repo(&self) -> repositories::token::TokenRepository {
        repositories::token::TokenRepository::new(self.conn.clone())
    }

    pub async fn create_account(&self, new: NewAccount) -> Result<Account, StoreError> {
        self.account_repo().create(new).await
    }

    pub async fn create_account_with_token(
        &self,
        new: NewAccount,
    ) -> Result<(Account, AuthToken), StoreError> {
        self.account_repo().create_with_token(new).await
    }

    pub async fn get_account(&self, id: i32) -> Result<Option<Account>> {
        self.account_repo().get_by_id(id).await
    }

    pub async fn get_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        self.account_repo().get_by_username(username).await
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.account_repo().list().await
    }

    pub async fn is_account_field_taken(
        &self,
        field: UniqueField,
        value: &str,
        exclude: Option<i32>,
    ) -> Result<bool> {
        self.account_repo().is_taken(field, value, exclude).await
    }

    pub async fn update_account(
        &self,
        id: i32,
        changes: AccountChanges,
    ) -> Result<Account, StoreError> {
        self.account_repo().update(id, changes).await
    }

    pub async fn delete_account(&self, id: i32) -> Result<(), StoreError> {
        self.account_repo().delete(id).await
    }

    pub async fn verify_account_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<Account>> {
        self.account_repo().verify_password(username, password).await
    }

    pub async fn issue_token(&self, account_id: i32) -> Result<AuthToken, StoreError> {
        self.token_repo().issue_or_get(account_id).await
    }

    pub async fn get_token_for_account(&self, account_id: i32) -> Result<Option<AuthToken>> {
        self.token_repo().get_for_account(account_id).await
    }

    pub async fn account_for_token(&self, key: &str) -> Result<Option<Account>> {
        self.token_repo().resolve(key).await
    }
}

/// Every connection to an in-memory SQLite URL opens its own database, so the
/// pool holds exactly one connection that is never closed for idleness or age.
async fn connect_in_memory(db_url: &str) -> Result<DatabaseConnection> {
    use sea_orm::sqlx::ConnectOptions as _;
    use sea_orm::sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    let options = SqliteConnectOptions::from_str(db_url)?.disable_statement_logging();

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    Ok(SqlxSqliteConnector::from_sqlx_sqlite_pool(pool))
}
