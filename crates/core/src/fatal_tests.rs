// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::coordinator::run_in_transaction;
use crate::liveness::ConnectionState;
use crate::shutdown::ProcessPhase;
use crate::store::FakeContentStore;
use std::time::Duration;
use crate::store::{ContentData, FakeTransaction};
use async_trait::async_trait;
use yare::parameterized;

struct Noop;

#[async_trait]
impl crate::coordinator::UnitOfWork<FakeTransaction<ContentData>> for Noop {
    type Output = ();

    async fn run(self, _tx: &mut FakeTransaction<ContentData>) -> Result<(), StoreError> {
        Ok(())
    }
}

fn tx_error(phase: TxPhase, source: StoreError) -> TxError {
    TxError::new(StoreKind::Content, phase, source)
}

fn unique() -> StoreError {
    StoreError::UniqueViolation {
        constraint: "sduser2_pkey".to_string(),
    }
}

#[parameterized(
    unique_violation = { TxPhase::Work, unique(), Severity::Recoverable },
    no_rows = { TxPhase::Work, StoreError::NoRows, Severity::Recoverable },
    unavailable = { TxPhase::Work, StoreError::Unavailable("connection reset".to_string()), Severity::Fatal },
    protocol = { TxPhase::Work, StoreError::Protocol("unexpected message".to_string()), Severity::Fatal },
    driver = { TxPhase::Work, StoreError::Driver("type mismatch".to_string()), Severity::Fatal },
    begin_unavailable = { TxPhase::Begin, StoreError::Unavailable("refused".to_string()), Severity::Fatal },
    quarantined = { TxPhase::Admission, StoreError::Quarantined { store: StoreKind::Content }, Severity::Fatal },
    commit_unique = { TxPhase::Commit, unique(), Severity::Fatal },
    commit_no_rows = { TxPhase::Commit, StoreError::NoRows, Severity::Fatal },
    gate_deadline = { TxPhase::Admission, StoreError::TimedOut, Severity::Recoverable },
    work_deadline = { TxPhase::Work, StoreError::TimedOut, Severity::Recoverable },
)]
fn classification(phase: TxPhase, source: StoreError, expected: Severity) {
    assert_eq!(classify(&tx_error(phase, source)), expected);
}

fn setup() -> (FatalEscalation, StoreHandle<FakeContentStore>, FakeContentStore) {
    let shutdown = ShutdownController::new(Duration::from_secs(5));
    let store = FakeContentStore::new();
    let handle = StoreHandle::new(StoreKind::Content, store.clone());
    (FatalEscalation::new(shutdown), handle, store)
}

#[tokio::test]
async fn handle_fatal_quarantines_and_drains() {
    let (escalation, handle, _store) = setup();
    let _in_flight = escalation.shutdown().admit().unwrap();

    let err = tx_error(TxPhase::Work, StoreError::Unavailable("connection reset".to_string()));
    let fatal = escalation.handle_fatal(err.clone(), &handle);

    assert_eq!(fatal.store, StoreKind::Content);
    assert_eq!(fatal.source, err);
    assert_eq!(handle.liveness().state(), ConnectionState::Dead);
    assert_eq!(escalation.shutdown().phase(), ProcessPhase::Draining);
    assert!(escalation
        .shutdown()
        .drain_cause()
        .is_some_and(|cause| cause.is_fatal()));
}

#[tokio::test]
async fn fatal_error_message_is_generic() {
    let (escalation, handle, _store) = setup();
    let err = tx_error(
        TxPhase::Commit,
        StoreError::Driver("password authentication failed for user sd".to_string()),
    );

    let fatal = escalation.handle_fatal(err, &handle);
    assert_eq!(fatal.to_string(), "internal error");
}

#[tokio::test]
async fn repeated_fatal_reports_are_idempotent() {
    let (escalation, handle, store) = setup();
    let _in_flight = escalation.shutdown().admit().unwrap();

    let first = tx_error(TxPhase::Work, StoreError::Unavailable("reset".to_string()));
    escalation.handle_fatal(first, &handle);

    // Follow-up attempts fail fast and report again
    let second = run_in_transaction(&handle, Noop).await.unwrap_err();
    assert_eq!(classify(&second), Severity::Fatal);
    escalation.handle_fatal(second, &handle);

    assert_eq!(store.begin_count(), 0);
    assert_eq!(
        escalation.shutdown().drain_cause(),
        Some(&DrainCause::Fatal(
            "content store: store unavailable: reset".to_string()
        ))
    );
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

#[test]
fn fatal_escalation_logs_diagnostics_once() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .without_time()
        .finish();

    let (escalation, handle, _store) = setup();
    tracing::subscriber::with_default(subscriber, || {
        let err = tx_error(TxPhase::Work, StoreError::Protocol("unexpected message 'Z'".to_string()));
        escalation.handle_fatal(err.clone(), &handle);
        escalation.handle_fatal(err, &handle);
    });

    let output = logs.contents();
    assert_eq!(output.matches("fatal store error, connection quarantined").count(), 1);
    assert_eq!(output.matches("fatal error on quarantined connection").count(), 1);
    assert!(output.contains("unexpected message"));
    assert!(output.contains("backtrace"));
    assert_eq!(escalation.shutdown().phase(), ProcessPhase::Draining);
}
