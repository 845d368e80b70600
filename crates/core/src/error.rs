// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store-level error types

use crate::store::StoreKind;
use thiserror::Error;

/// Errors reported by a store driver
///
/// The recoverable/fatal split lives in [`crate::fatal::classify`]; drivers only
/// have to keep the variants distinct.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },
    #[error("no rows returned")]
    NoRows,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("driver error: {0}")]
    Driver(String),
    #[error("{store} connection is quarantined")]
    Quarantined { store: StoreKind },
    /// The caller's deadline passed before the store answered; never reported for a commit
    #[error("deadline elapsed before the store answered")]
    TimedOut,
}

/// Where in the transaction lifecycle a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    /// Refused before contacting the store (dead connection)
    Admission,
    Begin,
    /// Returned by the unit of work itself
    Work,
    Commit,
}

impl std::fmt::Display for TxPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TxPhase::Admission => "admission",
            TxPhase::Begin => "begin",
            TxPhase::Work => "work",
            TxPhase::Commit => "commit",
        };
        write!(f, "{}", name)
    }
}

/// A failed call to [`crate::coordinator::run_in_transaction`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{store} transaction failed during {phase}: {source}")]
pub struct TxError {
    pub store: StoreKind,
    pub phase: TxPhase,
    #[source]
    pub source: StoreError,
}

impl TxError {
    pub fn new(store: StoreKind, phase: TxPhase, source: StoreError) -> Self {
        Self {
            store,
            phase,
            source,
        }
    }
}
