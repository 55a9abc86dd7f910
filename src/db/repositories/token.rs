use anyhow::{Context, Result};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    sea_query::OnConflict,
};
use tracing::debug;

use crate::db::StoreError;
use crate::entities::{auth_tokens, prelude::*};
use crate::models::account::{Account, AuthToken};

pub struct TokenRepository {
    conn: DatabaseConnection,
}

impl TokenRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn issue_or_get(&self, account_id: i32) -> Result<AuthToken, StoreError> {
        issue_or_get(&self.conn, account_id).await
    }

    pub async fn get_for_account(&self, account_id: i32) -> Result<Option<AuthToken>> {
        let token = find_for_account(&self.conn, account_id)
            .await
            .context("Failed to query token by account")?;

        Ok(token.map(AuthToken::from))
    }

    /// Resolves a presented key to the account that owns it.
    pub async fn resolve(&self, key: &str) -> Result<Option<Account>> {
        let found = AuthTokens::find_by_id(key.to_string())
            .find_also_related(Accounts)
            .one(&self.conn)
            .await
            .context("Failed to query token by key")?;

        Ok(found.and_then(|(_, account)| account.map(Account::from)))
    }
}

async fn find_for_account<C: ConnectionTrait>(
    conn: &C,
    account_id: i32,
) -> Result<Option<auth_tokens::Model>, sea_orm::DbErr> {
    AuthTokens::find()
        .filter(auth_tokens::Column::AccountId.eq(account_id))
        .one(conn)
        .await
}

/// Get-or-create keyed on the unique `account_id` column.
///
/// Racing callers both attempt the insert; `ON CONFLICT DO NOTHING` lets the
/// loser fall through to the re-read, so every caller sees the same key.
pub(crate) async fn issue_or_get<C: ConnectionTrait>(
    conn: &C,
    account_id: i32,
) -> Result<AuthToken, StoreError> {
    if let Some(existing) = find_for_account(conn, account_id).await? {
        return Ok(existing.into());
    }

    let candidate = auth_tokens::ActiveModel {
        key: Set(generate_token_key()),
        account_id: Set(account_id),
        created_at: Set(chrono::Utc::now().to_rfc3339()),
    };

    let inserted = AuthTokens::insert(candidate)
        .on_conflict(
            OnConflict::column(auth_tokens::Column::AccountId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    if inserted == 0 {
        debug!(account_id, "Token already issued by a concurrent request");
    }

    find_for_account(conn, account_id)
        .await?
        .map(AuthToken::from)
        .ok_or_else(|| {
            StoreError::Internal(anyhow::anyhow!(
                "Token for account {account_id} missing after insert"
            ))
        })
}

/// Generate a random token key (40 character hex string)
#[must_use]
pub fn generate_token_key() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: [u8; 20] = rng.random();

    bytes.iter().fold(String::with_capacity(40), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}
