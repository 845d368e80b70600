// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fatal store error classification and escalation
//!
//! Uniqueness violations and "no rows" are ordinary user-facing failures.
//! Everything else, including any failed commit, leaves the store in an
//! unknown state: the connection is quarantined and the process starts
//! draining. The failing request gets a generic error back as a value; no
//! component relies on unwinding.

use crate::connection::StoreHandle;
use crate::error::{StoreError, TxError, TxPhase};
use crate::shutdown::{DrainCause, ShutdownController};
use crate::store::{Store, StoreKind};
use std::backtrace::Backtrace;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Recoverable,
    Fatal,
}

/// Decide whether a transaction failure can be reported to the user as-is
pub fn classify(err: &TxError) -> Severity {
    if err.phase == TxPhase::Commit {
        return Severity::Fatal;
    }
    match err.source {
        StoreError::UniqueViolation { .. } | StoreError::NoRows => Severity::Recoverable,
        // The transaction was abandoned before commit, so the store state is known
        StoreError::TimedOut => Severity::Recoverable,
        StoreError::Unavailable(_)
        | StoreError::Protocol(_)
        | StoreError::Driver(_)
        | StoreError::Quarantined { .. } => Severity::Fatal,
    }
}

/// An escalated infrastructure failure
///
/// Displays a generic message; the underlying error is the source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("internal error")]
pub struct FatalError {
    pub store: StoreKind,
    #[source]
    pub source: TxError,
}

/// Escalation path for fatal errors
#[derive(Debug, Clone)]
pub struct FatalEscalation {
    shutdown: ShutdownController,
}

impl FatalEscalation {
    pub fn new(shutdown: ShutdownController) -> Self {
        Self { shutdown }
    }

    pub fn shutdown(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Quarantine the connection, record diagnostics and start draining
    ///
    /// Safe to call from any number of workers for the same failure: the
    /// quarantine and the drain transition each happen once.
    pub fn handle_fatal<S: Store>(&self, err: TxError, handle: &StoreHandle<S>) -> FatalError {
        let store = handle.kind();

        if handle.liveness().quarantine() {
            let backtrace = Backtrace::force_capture();
            tracing::error!(
                %store,
                phase = %err.phase,
                error = %err.source,
                %backtrace,
                "fatal store error, connection quarantined"
            );
        } else {
            tracing::error!(%store, error = %err, "fatal error on quarantined connection");
        }

        self.shutdown
            .begin_draining(DrainCause::Fatal(format!("{} store: {}", store, err.source)));

        FatalError { store, source: err }
    }
}

#[cfg(test)]
#[path = "fatal_tests.rs"]
mod tests;
