use anyhow::{Context, Result};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use std::time::Duration;
use tokio::task;
use tracing::debug;

use super::token;
use crate::config::SecurityConfig;
use crate::db::StoreError;
use crate::entities::{accounts, auth_tokens, prelude::*};
use crate::models::account::{Account, AccountChanges, AuthToken, NewAccount, UniqueField};

/// Write transactions retried after losing a SQLite lock race.
const WRITE_ATTEMPTS: usize = 5;

pub struct AccountRepository {
    conn: DatabaseConnection,
    security: SecurityConfig,
}

impl AccountRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection, security: SecurityConfig) -> Self {
        Self { conn, security }
    }

    pub async fn get_by_id(&self, id: i32) -> Result<Option<Account>> {
        let account = Accounts::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query account by ID")?;

        Ok(account.map(Account::from))
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<Account>> {
        let account = Accounts::find()
            .filter(accounts::Column::Username.eq(username))
            .one(&self.conn)
            .await
            .context("Failed to query account by username")?;

        Ok(account.map(Account::from))
    }

    pub async fn list(&self) -> Result<Vec<Account>> {
        let accounts = Accounts::find()
            .order_by_asc(accounts::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list accounts")?;

        Ok(accounts.into_iter().map(Account::from).collect())
    }

    /// Whether `value` is already used by an account other than `exclude`.
    pub async fn is_taken(
        &self,
        field: UniqueField,
        value: &str,
        exclude: Option<i32>,
    ) -> Result<bool> {
        find_holder(&self.conn, field, value, exclude)
            .await
            .map(|holder| holder.is_some())
            .with_context(|| format!("Failed to check {field} uniqueness"))
    }

    pub async fn create(&self, new: NewAccount) -> Result<Account, StoreError> {
        let password_hash = self.hash_in_background(new.password.clone()).await?;
        let (account, _) = self.insert_with_retry(&new, &password_hash, false).await?;

        Ok(account)
    }

    /// Inserts the account and issues its token in one transaction.
    pub async fn create_with_token(
        &self,
        new: NewAccount,
    ) -> Result<(Account, AuthToken), StoreError> {
        let password_hash = self.hash_in_background(new.password.clone()).await?;
        let (account, token) = self.insert_with_retry(&new, &password_hash, true).await?;

        let token = token.ok_or_else(|| {
            StoreError::Internal(anyhow::anyhow!(
                "Token for account {} missing after registration",
                account.id
            ))
        })?;

        Ok((account, token))
    }

    async fn insert_with_retry(
        &self,
        new: &NewAccount,
        password_hash: &str,
        issue_token: bool,
    ) -> Result<(Account, Option<AuthToken>), StoreError> {
        let mut attempt = 1;
        loop {
            match self.insert_once(new, password_hash, issue_token).await {
                Err(err) if attempt < WRITE_ATTEMPTS && is_lock_conflict(&err) => {
                    debug!(attempt, username = %new.username, "Retrying account insert");
                    backoff(attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn insert_once(
        &self,
        new: &NewAccount,
        password_hash: &str,
        issue_token: bool,
    ) -> Result<(Account, Option<AuthToken>), StoreError> {
        let txn = self.conn.begin().await?;
        let account = insert_account(&txn, new.clone(), password_hash.to_string()).await?;
        let token = if issue_token {
            Some(token::issue_or_get(&txn, account.id).await?)
        } else {
            None
        };
        txn.commit().await?;

        Ok((account.into(), token))
    }

    pub async fn update(&self, id: i32, changes: AccountChanges) -> Result<Account, StoreError> {
        let password_hash = match changes.password.clone() {
            Some(password) => Some(self.hash_in_background(password).await?),
            None => None,
        };

        let mut attempt = 1;
        loop {
            match self
                .update_once(id, changes.clone(), password_hash.clone())
                .await
            {
                Err(err) if attempt < WRITE_ATTEMPTS && is_lock_conflict(&err) => {
                    debug!(attempt, account_id = id, "Retrying account update");
                    backoff(attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn update_once(
        &self,
        id: i32,
        changes: AccountChanges,
        password_hash: Option<String>,
    ) -> Result<Account, StoreError> {
        let txn = self.conn.begin().await?;

        let existing = Accounts::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(StoreError::NotFound(id))?;

        if let Some(username) = &changes.username {
            ensure_unique(&txn, UniqueField::Username, username, Some(id)).await?;
        }
        if let Some(email) = &changes.email {
            ensure_unique(&txn, UniqueField::Email, email, Some(id)).await?;
        }

        let mut active: accounts::ActiveModel = existing.into();
        if let Some(username) = changes.username {
            active.username = Set(username);
        }
        if let Some(email) = changes.email {
            active.email = Set(email);
        }
        if let Some(first_name) = changes.first_name {
            active.first_name = Set(first_name);
        }
        if let Some(last_name) = changes.last_name {
            active.last_name = Set(last_name);
        }
        if let Some(hash) = password_hash {
            active.password_hash = Set(hash);
        }
        if let Some(is_active) = changes.is_active {
            active.is_active = Set(is_active);
        }
        if let Some(is_staff) = changes.is_staff {
            active.is_staff = Set(is_staff);
        }
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());

        let updated = active.update(&txn).await.map_err(map_unique_violation)?;
        txn.commit().await?;

        Ok(updated.into())
    }

    /// Removes the account together with its token.
    pub async fn delete(&self, id: i32) -> Result<(), StoreError> {
        let txn = self.conn.begin().await?;

        AuthTokens::delete_many()
            .filter(auth_tokens::Column::AccountId.eq(id))
            .exec(&txn)
            .await?;

        let result = Accounts::delete_by_id(id).exec(&txn).await?;
        if result.rows_affected == 0 {
            return Err(StoreError::NotFound(id));
        }

        txn.commit().await?;
        Ok(())
    }

    /// Returns the account when `password` matches its stored hash.
    ///
    /// Inactive accounts never verify.
    /// Note: This uses `spawn_blocking` because Argon2 hashing is CPU-intensive
    /// and would block the async runtime if run directly.
    pub async fn verify_password(&self, username: &str, password: &str) -> Result<Option<Account>> {
        let account = Accounts::find()
            .filter(accounts::Column::Username.eq(username))
            .one(&self.conn)
            .await
            .context("Failed to query account for password verification")?;

        // Unknown and inactive accounts still pay for one hash so response
        // time does not reveal which usernames exist.
        let Some(account) = account.filter(|a| a.is_active) else {
            debug!("Rejected login for unknown or inactive account");
            self.hash_in_background(password.to_string()).await?;
            return Ok(None);
        };

        let password_hash = account.password_hash.clone();
        let password = password.to_string();

        let is_valid = task::spawn_blocking(move || {
            let parsed_hash = PasswordHash::new(&password_hash)
                .map_err(|e| anyhow::anyhow!("Invalid password hash format: {e}"))?;

            Ok::<bool, anyhow::Error>(
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed_hash)
                    .is_ok(),
            )
        })
        .await
        .context("Password verification task panicked")??;

        Ok(is_valid.then(|| Account::from(account)))
    }

    async fn hash_in_background(&self, password: String) -> Result<String> {
        let config = self.security.clone();
        task::spawn_blocking(move || hash_password(&password, &config))
            .await
            .context("Password hashing task panicked")?
    }
}

async fn find_holder<C: ConnectionTrait>(
    conn: &C,
    field: UniqueField,
    value: &str,
    exclude: Option<i32>,
) -> Result<Option<accounts::Model>, DbErr> {
    let column = match field {
        UniqueField::Username => accounts::Column::Username,
        UniqueField::Email => accounts::Column::Email,
    };

    let mut query = Accounts::find().filter(column.eq(value));
    if let Some(id) = exclude {
        query = query.filter(accounts::Column::Id.ne(id));
    }

    query.one(conn).await
}

async fn ensure_unique<C: ConnectionTrait>(
    conn: &C,
    field: UniqueField,
    value: &str,
    exclude: Option<i32>,
) -> Result<(), StoreError> {
    if find_holder(conn, field, value, exclude).await?.is_some() {
        return Err(StoreError::Conflict(field));
    }
    Ok(())
}

async fn insert_account<C: ConnectionTrait>(
    conn: &C,
    new: NewAccount,
    password_hash: String,
) -> Result<accounts::Model, StoreError> {
    ensure_unique(conn, UniqueField::Username, &new.username, None).await?;
    ensure_unique(conn, UniqueField::Email, &new.email, None).await?;

    let now = chrono::Utc::now().to_rfc3339();

    accounts::ActiveModel {
        username: Set(new.username),
        email: Set(new.email),
        first_name: Set(new.first_name),
        last_name: Set(new.last_name),
        password_hash: Set(password_hash),
        is_active: Set(new.is_active),
        is_staff: Set(new.is_staff),
        date_joined: Set(now.clone()),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await
    .map_err(map_unique_violation)
}

/// A concurrent writer can still win between the pre-check and the write;
/// the unique index has the final say.
fn map_unique_violation(err: DbErr) -> StoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(message)) => {
            if message.contains("email") {
                StoreError::Conflict(UniqueField::Email)
            } else {
                StoreError::Conflict(UniqueField::Username)
            }
        }
        _ => StoreError::Database(err),
    }
}

/// SQLite refuses the second of two racing write transactions with
/// `SQLITE_BUSY` instead of blocking it.
fn is_lock_conflict(err: &StoreError) -> bool {
    match err {
        StoreError::Database(e) => {
            let message = e.to_string();
            message.contains("database is locked") || message.contains("database table is locked")
        }
        _ => false,
    }
}

async fn backoff(attempt: usize) {
    tokio::time::sleep(Duration::from_millis(20 * attempt as u64)).await;
}

/// Hash a password using Argon2id with the configured cost parameters.
pub fn hash_password(password: &str, config: &SecurityConfig) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let params = Params::new(
        config.argon2_memory_cost_kib,
        config.argon2_time_cost,
        config.argon2_parallelism,
        None,
    )
    .map_err(|e| anyhow::anyhow!("Invalid Argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

    Ok(hash.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_config() -> SecurityConfig {
        SecurityConfig {
            argon2_memory_cost_kib: 1024,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
        }
    }

    #[test]
    fn test_hash_password_is_salted_phc_string() {
        let config = cheap_config();
        let first = hash_password("Str0ngPass!", &config).unwrap();
        let second = hash_password("Str0ngPass!", &config).unwrap();

        assert!(first.starts_with("$argon2id$"));
        assert_ne!(first, second);
        assert!(!first.contains("Str0ngPass!"));

        let parsed = PasswordHash::new(&first).unwrap();
        assert!(
            Argon2::default()
                .verify_password(b"Str0ngPass!", &parsed)
                .is_ok()
        );
        assert!(Argon2::default().verify_password(b"wrong", &parsed).is_err());
    }

    #[test]
    fn test_hash_password_rejects_bad_params() {
        let config = SecurityConfig {
            argon2_memory_cost_kib: 1,
            argon2_time_cost: 0,
            argon2_parallelism: 0,
        };
        assert!(hash_password("whatever", &config).is_err());
    }

    #[test]
    fn test_is_lock_conflict() {
        let locked = StoreError::Database(DbErr::Custom("database is locked".to_string()));
        assert!(is_lock_conflict(&locked));

        let other = StoreError::Database(DbErr::Custom("no such table: accounts".to_string()));
        assert!(!is_lock_conflict(&other));
        assert!(!is_lock_conflict(&StoreError::Conflict(UniqueField::Username)));
        assert!(!is_lock_conflict(&StoreError::NotFound(1)));
    }
}
