// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared handle to one store connection

use crate::error::{StoreError, TxError, TxPhase};
use crate::gate::WriteGate;
use crate::liveness::Liveness;
use crate::store::{Store, StoreKind};

/// A store together with its liveness flag and write gate
///
/// Cloning is cheap; all clones share the same liveness and gate, so one
/// handle per store is created at startup and handed to every worker.
#[derive(Debug, Clone)]
pub struct StoreHandle<S> {
    kind: StoreKind,
    store: S,
    liveness: Liveness,
    gate: WriteGate,
}

impl<S: Store> StoreHandle<S> {
    pub fn new(kind: StoreKind, store: S) -> Self {
        Self {
            kind,
            store,
            liveness: Liveness::new(),
            gate: WriteGate::new(),
        }
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn gate(&self) -> &WriteGate {
        &self.gate
    }

    /// Refuse work on a quarantined connection without touching the store
    pub(crate) fn ensure_live(&self) -> Result<(), TxError> {
        if self.liveness.is_live() {
            Ok(())
        } else {
            Err(TxError::new(
                self.kind,
                TxPhase::Admission,
                StoreError::Quarantined { store: self.kind },
            ))
        }
    }
}
