//! Store-level tests for account persistence and token issuance.

use futures::future::join_all;
use roster::config::SecurityConfig;
use roster::db::{Store, StoreError};
use roster::models::account::{AccountChanges, NewAccount, UniqueField};

fn cheap_security() -> SecurityConfig {
    SecurityConfig {
        argon2_memory_cost_kib: 1024,
        argon2_time_cost: 1,
        argon2_parallelism: 1,
    }
}

async fn temp_store() -> (Store, std::path::PathBuf) {
    let db_path =
        std::env::temp_dir().join(format!("roster-store-test-{}.db", uuid::Uuid::new_v4()));
    let url = format!("sqlite:{}", db_path.display());
    let store = Store::with_pool_options(&url, 4, 1, cheap_security())
        .await
        .expect("Failed to open store");
    (store, db_path)
}

fn new_account(username: &str, email: &str) -> NewAccount {
    NewAccount {
        username: username.to_string(),
        email: email.to_string(),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
        password: "Str0ngPass!".to_string(),
        is_active: true,
        is_staff: false,
    }
}

#[tokio::test]
async fn test_issue_token_is_idempotent() {
    let (store, db_path) = temp_store().await;
    let account = store
        .create_account(new_account("bob", "bob@x.com"))
        .await
        .unwrap();

    assert!(store.get_token_for_account(account.id).await.unwrap().is_none());

    let first = store.issue_token(account.id).await.unwrap();
    let second = store.issue_token(account.id).await.unwrap();

    assert_eq!(first.key, second.key);
    assert_eq!(first.account_id, account.id);

    let resolved = store.account_for_token(&first.key).await.unwrap().unwrap();
    assert_eq!(resolved.id, account.id);

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn test_concurrent_issue_yields_one_token() {
    let (store, db_path) = temp_store().await;
    let account = store
        .create_account(new_account("bob", "bob@x.com"))
        .await
        .unwrap();

    let results = join_all((0..8).map(|_| {
        let store = store.clone();
        async move { store.issue_token(account.id).await }
    }))
    .await;

    let keys: Vec<String> = results
        .into_iter()
        .map(|result| result.unwrap().key)
        .collect();
    assert!(keys.windows(2).all(|pair| pair[0] == pair[1]));

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn test_duplicate_email_conflicts() {
    let (store, db_path) = temp_store().await;
    store
        .create_account(new_account("bob", "bob@x.com"))
        .await
        .unwrap();

    let err = store
        .create_account_with_token(new_account("robert", "bob@x.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(UniqueField::Email)));

    // The failed registration left nothing behind.
    assert_eq!(store.list_accounts().await.unwrap().len(), 1);
    assert!(store.get_account_by_username("robert").await.unwrap().is_none());

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn test_create_with_token_is_atomic_unit() {
    let (store, db_path) = temp_store().await;

    let (account, token) = store
        .create_account_with_token(new_account("bob", "bob@x.com"))
        .await
        .unwrap();

    let stored = store.get_token_for_account(account.id).await.unwrap().unwrap();
    assert_eq!(stored.key, token.key);
    assert_eq!(token.key.len(), 40);

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn test_verify_password() {
    let (store, db_path) = temp_store().await;
    let account = store
        .create_account(new_account("bob", "bob@x.com"))
        .await
        .unwrap();

    assert!(
        store
            .verify_account_password("bob", "Str0ngPass!")
            .await
            .unwrap()
            .is_some()
    );
    assert!(
        store
            .verify_account_password("bob", "wrong")
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        store
            .verify_account_password("nobody", "Str0ngPass!")
            .await
            .unwrap()
            .is_none()
    );

    store
        .update_account(
            account.id,
            AccountChanges {
                is_active: Some(false),
                ..AccountChanges::default()
            },
        )
        .await
        .unwrap();
    assert!(
        store
            .verify_account_password("bob", "Str0ngPass!")
            .await
            .unwrap()
            .is_none()
    );

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn test_update_and_delete() {
    let (store, db_path) = temp_store().await;
    let bob = store
        .create_account(new_account("bob", "bob@x.com"))
        .await
        .unwrap();
    let alice = store
        .create_account(new_account("alice", "alice@x.com"))
        .await
        .unwrap();

    let err = store
        .update_account(
            alice.id,
            AccountChanges {
                username: Some("bob".to_string()),
                ..AccountChanges::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(UniqueField::Username)));

    let updated = store
        .update_account(
            bob.id,
            AccountChanges {
                first_name: Some("Robert".to_string()),
                ..AccountChanges::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.first_name, "Robert");
    assert_eq!(updated.date_joined, bob.date_joined);

    let token = store.issue_token(bob.id).await.unwrap();
    store.delete_account(bob.id).await.unwrap();

    assert!(store.get_account(bob.id).await.unwrap().is_none());
    assert!(store.account_for_token(&token.key).await.unwrap().is_none());
    assert!(matches!(
        store.delete_account(bob.id).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.update_account(bob.id, AccountChanges::default()).await,
        Err(StoreError::NotFound(_))
    ));

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn test_concurrent_registration_creates_one_account() {
    let (store, db_path) = temp_store().await;

    let results = join_all((0..6).map(|i| {
        let store = store.clone();
        async move {
            store
                .create_account_with_token(new_account("bob", &format!("bob{i}@x.com")))
                .await
        }
    }))
    .await;

    let mut winners = Vec::new();
    for result in results {
        match result {
            Ok(created) => winners.push(created),
            Err(err) => assert!(
                matches!(err, StoreError::Conflict(UniqueField::Username)),
                "unexpected error: {err}"
            ),
        }
    }
    assert_eq!(winners.len(), 1);

    let (account, token) = &winners[0];
    assert_eq!(store.list_accounts().await.unwrap().len(), 1);
    let stored = store.get_token_for_account(account.id).await.unwrap().unwrap();
    assert_eq!(&stored.key, &token.key);

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn test_unknown_username_still_hashes() {
    // Parameters the hasher rejects make the hashing step observable.
    let broken = SecurityConfig {
        argon2_memory_cost_kib: 1,
        argon2_time_cost: 0,
        argon2_parallelism: 0,
    };
    let store = Store::with_pool_options("sqlite::memory:", 1, 1, broken)
        .await
        .unwrap();

    assert!(
        store
            .verify_account_password("nobody", "Str0ngPass!")
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_in_memory_pool_keeps_its_connection() {
    let store = Store::with_pool_options("sqlite::memory:", 8, 1, cheap_security())
        .await
        .unwrap();

    let options = store.conn.get_sqlite_connection_pool().options();
    assert_eq!(options.get_max_connections(), 1);
    assert_eq!(options.get_idle_timeout(), None);
    assert_eq!(options.get_max_lifetime(), None);

    // Data written through one query is visible to the next.
    store
        .create_account(new_account("bob", "bob@x.com"))
        .await
        .unwrap();
    assert!(store.get_account_by_username("bob").await.unwrap().is_some());
}
