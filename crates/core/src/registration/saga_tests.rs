// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::liveness::ConnectionState;
use crate::shutdown::{ProcessPhase, ShutdownController};
use crate::store::{FakeContentStore, FakeCredentialsStore};
use std::collections::HashSet;
use std::time::Duration;

type Saga = RegistrationSaga<FakeCredentialsStore, FakeContentStore>;

struct Fixture {
    saga: Saga,
    credentials: FakeCredentialsStore,
    content: FakeContentStore,
}

impl Fixture {
    fn new() -> Self {
        let credentials = FakeCredentialsStore::new();
        let content = FakeContentStore::new();
        let shutdown = ShutdownController::new(Duration::from_secs(5));
        let saga = RegistrationSaga::new(
            StoreHandle::new(StoreKind::Credentials, credentials.clone()),
            StoreHandle::new(StoreKind::Content, content.clone()),
            FatalEscalation::new(shutdown),
        );
        Self {
            saga,
            credentials,
            content,
        }
    }

    fn phase(&self) -> ProcessPhase {
        self.saga.escalation().shutdown().phase()
    }
}

fn request(nickname: &str, key: &str) -> RegistrationRequest {
    RegistrationRequest::new(nickname, key).unwrap()
}

#[test]
fn request_requires_both_parameters() {
    assert_eq!(
        RegistrationRequest::from_params(None, Some("key")),
        Err(ValidationError::Missing("nickname"))
    );
    assert_eq!(
        RegistrationRequest::from_params(Some("alice"), None),
        Err(ValidationError::Missing("confirmationkey"))
    );
    assert_eq!(
        RegistrationRequest::from_params(Some(""), Some("key")),
        Err(ValidationError::Empty("nickname"))
    );
    assert_eq!(
        RegistrationRequest::from_params(Some("alice"), Some("  ")),
        Err(ValidationError::Empty("confirmationkey"))
    );

    let req = RegistrationRequest::from_params(Some("alice"), Some("key")).unwrap();
    assert_eq!(req.nickname(), "alice");
    assert_eq!(req.confirmation_key(), "key");
}

#[test]
fn request_parameters_are_trimmed() {
    let req = RegistrationRequest::new(" alice ", "\tkey-1\n").unwrap();
    assert_eq!(req.nickname(), "alice");
    assert_eq!(req.confirmation_key(), "key-1");

    assert_eq!(
        RegistrationRequest::new(" \t", "key-1"),
        Err(ValidationError::Empty("nickname"))
    );
}

#[tokio::test]
async fn padded_request_confirms_the_stored_key() {
    let f = Fixture::new();
    f.credentials.add_registration("key-1", "alice");

    let outcome = f
        .saga
        .confirm_registration(&RegistrationRequest::new("alice ", " key-1").unwrap())
        .await
        .unwrap();

    assert_eq!(outcome.user_id(), Some(UserId(1)));
    assert_eq!(f.content.users().get(&UserId(1)).map(String::as_str), Some("alice"));
}

#[tokio::test]
async fn valid_key_allocates_and_promotes_user() {
    let f = Fixture::new();
    f.credentials.add_registration("key-1", "alice");

    let outcome = f
        .saga
        .confirm_registration(&request("alice", "key-1"))
        .await
        .unwrap();

    assert!(outcome.is_confirmed());
    let id = outcome.user_id().unwrap();
    assert_eq!(f.credentials.users().get(&id).map(String::as_str), Some("alice"));
    assert_eq!(f.content.users().get(&id).map(String::as_str), Some("alice"));
    assert_eq!(f.credentials.commit_count(), 1);
    assert_eq!(f.content.commit_count(), 1);
    assert_eq!(f.phase(), ProcessPhase::Running);
}

#[tokio::test]
async fn replayed_key_is_rejected_without_new_allocation() {
    let f = Fixture::new();
    f.credentials.add_registration("key-1", "alice");
    f.saga
        .confirm_registration(&request("alice", "key-1"))
        .await
        .unwrap();

    let err = f
        .saga
        .confirm_registration(&request("alice", "key-1"))
        .await
        .unwrap_err();

    assert_eq!(err, RegistrationError::StaleKey);
    assert_eq!(f.credentials.users().len(), 1);
    assert_eq!(f.content.users().len(), 1);
    assert_eq!(f.content.begin_count(), 1);
    assert_eq!(f.phase(), ProcessPhase::Running);
    assert!(f.saga.credentials().liveness().is_live());
}

#[tokio::test]
async fn unknown_key_never_touches_content_store() {
    let f = Fixture::new();

    let err = f
        .saga
        .confirm_registration(&request("alice", "forged"))
        .await
        .unwrap_err();

    assert_eq!(err, RegistrationError::StaleKey);
    assert_eq!(f.credentials.rollback_count(), 1);
    assert!(f.content.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_confirmations_get_distinct_ids() {
    let f = Fixture::new();
    const N: usize = 32;
    for i in 0..N {
        f.credentials
            .add_registration(&format!("key-{i}"), &format!("user-{i}"));
    }

    let tasks: Vec<_> = (0..N)
        .map(|i| {
            let saga = f.saga.clone();
            tokio::spawn(async move {
                saga.confirm_registration(&request(&format!("user-{i}"), &format!("key-{i}")))
                    .await
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        ids.insert(outcome.user_id().unwrap());
    }

    assert_eq!(ids.len(), N);
    assert_eq!(f.credentials.users().len(), N);
    assert_eq!(f.content.users().len(), N);
    for handle_gate in [f.saga.credentials().gate(), f.saga.content().gate()] {
        assert_eq!(handle_gate.acquisitions(), N as u64);
        assert_eq!(handle_gate.releases(), N as u64);
    }
}

#[tokio::test]
async fn content_outage_after_credentials_commit_drains_and_keeps_allocation() {
    let f = Fixture::new();
    f.credentials.add_registration("key-1", "alice");
    f.content
        .fail_next_operation(StoreError::Unavailable("connection reset by peer".to_string()));

    let err = f
        .saga
        .confirm_registration(&request("alice", "key-1"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RegistrationError::Fatal(FatalError {
            store: StoreKind::Content,
            ..
        })
    ));
    // The credentials step stays committed
    assert_eq!(f.credentials.users().len(), 1);
    assert!(!f.credentials.snapshot().is_pending("key-1"));
    assert!(f.content.users().is_empty());

    assert_eq!(f.phase(), ProcessPhase::Draining);
    assert_eq!(
        f.saga.content().liveness().state(),
        ConnectionState::Dead
    );
    assert!(f.saga.credentials().liveness().is_live());
}

#[tokio::test]
async fn quarantined_content_store_is_not_contacted_again() {
    let f = Fixture::new();
    f.credentials.add_registration("key-1", "alice");
    f.credentials.add_registration("key-2", "bob");
    f.content
        .fail_next_begin(StoreError::Unavailable("connection refused".to_string()));

    let _ = f.saga.confirm_registration(&request("alice", "key-1")).await;
    assert_eq!(f.content.begin_count(), 1);

    let err = f
        .saga
        .confirm_registration(&request("bob", "key-2"))
        .await
        .unwrap_err();

    assert!(matches!(err, RegistrationError::Fatal(_)));
    assert_eq!(f.content.begin_count(), 1);
}

#[tokio::test]
async fn duplicate_content_record_is_recoverable() {
    let f = Fixture::new();
    f.credentials.add_registration("key-1", "alice");
    f.content.seed_user(UserId(1), "someone-else");

    let err = f
        .saga
        .confirm_registration(&request("alice", "key-1"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RegistrationError::Conflict {
            store: StoreKind::Content,
            constraint: "sduser2_pkey".to_string()
        }
    );
    assert_eq!(f.phase(), ProcessPhase::Running);
    assert!(f.saga.content().liveness().is_live());
}

#[tokio::test]
async fn credentials_commit_failure_is_fatal() {
    let f = Fixture::new();
    f.credentials.add_registration("key-1", "alice");
    f.credentials
        .fail_next_commit(StoreError::Unavailable("server closed the connection".to_string()));

    let err = f
        .saga
        .confirm_registration(&request("alice", "key-1"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RegistrationError::Fatal(FatalError {
            store: StoreKind::Credentials,
            ..
        })
    ));
    assert!(f.credentials.users().is_empty());
    assert!(f.content.calls().is_empty());
    assert_eq!(f.phase(), ProcessPhase::Draining);
    assert!(!f.saga.credentials().liveness().is_live());
}

#[tokio::test]
async fn nickname_already_registered_is_conflict() {
    let f = Fixture::new();
    f.credentials.add_registration("key-1", "alice");
    f.credentials.add_registration("key-2", "alice");
    f.saga
        .confirm_registration(&request("alice", "key-1"))
        .await
        .unwrap();

    let err = f
        .saga
        .confirm_registration(&request("alice", "key-2"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RegistrationError::Conflict {
            store: StoreKind::Credentials,
            ..
        }
    ));
    assert!(f.credentials.snapshot().is_pending("key-2"));
}

fn deadline_in(ms: u64) -> Instant {
    Instant::now() + Duration::from_millis(ms)
}

#[tokio::test]
async fn deadline_before_credentials_commit_leaves_key_pending() {
    let f = Fixture::new();
    f.credentials.add_registration("key-1", "alice");
    let _writer = f.saga.credentials().gate().acquire().await;

    let err = f
        .saga
        .confirm_registration_by(&request("alice", "key-1"), deadline_in(20))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RegistrationError::TimedOut {
            store: StoreKind::Credentials
        }
    );
    assert!(f.credentials.snapshot().is_pending("key-1"));
    assert_eq!(f.phase(), ProcessPhase::Running);
}

/// A writer that captures log output for testing
#[derive(Clone, Default)]
struct CapturedLogs {
    logs: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.logs.lock().unwrap()).to_string()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.logs.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn deadline_after_credentials_commit_is_not_promoted() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .without_time()
        .finish();
    let _subscriber = tracing::subscriber::set_default(subscriber);

    let f = Fixture::new();
    f.credentials.add_registration("key-1", "alice");
    let writer = f.saga.content().gate().acquire().await;

    let err = f
        .saga
        .confirm_registration_by(&request("alice", "key-1"), deadline_in(50))
        .await
        .unwrap_err();

    assert_eq!(err, RegistrationError::NotPromoted { user_id: UserId(1) });
    assert_eq!(f.credentials.users().get(&UserId(1)).map(String::as_str), Some("alice"));
    assert!(f.content.users().is_empty());
    assert_eq!(f.content.begin_count(), 0);
    assert_eq!(f.phase(), ProcessPhase::Running);
    assert!(f.saga.content().liveness().is_live());

    let output = logs.contents();
    assert!(output.contains("user allocated but not promoted to content store"));
    assert!(output.contains("user_id=1"), "{output}");

    // The key is spent, so a retry cannot repair the gap
    drop(writer);
    let retry = f
        .saga
        .confirm_registration(&request("alice", "key-1"))
        .await
        .unwrap_err();
    assert_eq!(retry, RegistrationError::StaleKey);
}
