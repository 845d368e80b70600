// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn write_options() -> TxOptions {
    TxOptions::repeatable_read(AccessMode::ReadWrite)
}

#[tokio::test]
async fn commit_publishes_working_copy() {
    let store = FakeCredentialsStore::new();
    store.add_registration("key-1", "alice");

    let mut tx = store.begin(write_options()).await.unwrap();
    let id = tx
        .process_registration_confirmation("key-1", "alice")
        .await
        .unwrap();

    // Not visible before commit
    assert!(store.users().is_empty());

    tx.commit().await.unwrap();
    assert_eq!(store.users().get(&id).map(String::as_str), Some("alice"));
    assert!(!store.snapshot().is_pending("key-1"));
}

#[tokio::test]
async fn dropped_transaction_is_abandoned_and_discarded() {
    let store = FakeCredentialsStore::new();
    store.add_registration("key-1", "alice");

    {
        let mut tx = store.begin(write_options()).await.unwrap();
        tx.process_registration_confirmation("key-1", "alice")
            .await
            .unwrap();
    }

    assert!(store.users().is_empty());
    assert!(store.snapshot().is_pending("key-1"));
    assert_eq!(store.calls().last(), Some(&StoreCall::Abandoned));
    assert_eq!(store.rollback_count(), 1);
}

#[tokio::test]
async fn consumed_key_returns_no_rows() {
    let store = FakeCredentialsStore::new();
    store.add_registration("key-1", "alice");

    let mut tx = store.begin(write_options()).await.unwrap();
    tx.process_registration_confirmation("key-1", "alice")
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin(write_options()).await.unwrap();
    let result = tx.process_registration_confirmation("key-1", "alice").await;
    assert_eq!(result, Err(StoreError::NoRows));
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn key_must_match_nickname() {
    let store = FakeCredentialsStore::new();
    store.add_registration("key-1", "alice");

    let mut tx = store.begin(write_options()).await.unwrap();
    let result = tx.process_registration_confirmation("key-1", "mallory").await;
    assert_eq!(result, Err(StoreError::NoRows));
}

#[tokio::test]
async fn read_only_commit_does_not_publish() {
    let store = FakeContentStore::new();
    store.seed_user(UserId(7), "bob");

    let mut tx = store
        .begin(TxOptions::repeatable_read(AccessMode::ReadOnly))
        .await
        .unwrap();
    assert_eq!(tx.find_user(UserId(7)).await.unwrap().as_deref(), Some("bob"));
    assert!(matches!(
        tx.insert_user(UserId(8), "carol").await,
        Err(StoreError::Driver(_))
    ));
    tx.commit().await.unwrap();

    assert_eq!(store.users().len(), 1);
}

#[tokio::test]
async fn duplicate_user_id_is_unique_violation() {
    let store = FakeContentStore::new();
    store.seed_user(UserId(1), "alice");

    let mut tx = store.begin(write_options()).await.unwrap();
    let result = tx.insert_user(UserId(1), "alice").await;
    assert!(matches!(result, Err(StoreError::UniqueViolation { .. })));
}

#[tokio::test]
async fn injected_faults_fire_once() {
    let store = FakeContentStore::new();
    store.fail_next_begin(StoreError::Unavailable("connection refused".to_string()));

    assert!(store.begin(write_options()).await.is_err());
    let tx = store.begin(write_options()).await.unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(store.begin_count(), 2);
}

#[tokio::test]
async fn failed_commit_discards_changes() {
    let store = FakeContentStore::new();
    store.fail_next_commit(StoreError::Unavailable("server closed the connection".to_string()));

    let mut tx = store.begin(write_options()).await.unwrap();
    tx.insert_user(UserId(1), "alice").await.unwrap();
    assert!(tx.commit().await.is_err());

    assert!(store.users().is_empty());
    assert_eq!(store.commit_count(), 1);
}
