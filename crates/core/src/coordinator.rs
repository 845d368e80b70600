// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transaction coordinator
//!
//! Runs a unit of work inside one repeatable-read transaction:
//!
//! 1. Refuse immediately if the connection is quarantined
//! 2. Take the store's write gate (write units only)
//! 3. Begin, run the unit of work, then commit or roll back
//!
//! The transaction handle and gate guard are owned by this function's frame, so
//! a cancelled or unwinding call still rolls back (handle drop) and releases the
//! gate (guard drop).
//!
//! An optional deadline bounds the gate wait, the begin and the unit of work.
//! The commit is never bounded: once it is sent, its outcome is awaited.

use std::future::Future;

use crate::connection::StoreHandle;
use crate::error::{StoreError, TxError, TxPhase};
use crate::store::{AccessMode, Store, StoreTransaction, TxOptions};
use async_trait::async_trait;
use tokio::time::Instant;

/// Work executed against an open transaction
#[async_trait]
pub trait UnitOfWork<T: StoreTransaction>: Send {
    type Output: Send;

    /// Write units are serialized through the store's gate; read units bypass it
    fn access(&self) -> AccessMode {
        AccessMode::ReadWrite
    }

    async fn run(self, tx: &mut T) -> Result<Self::Output, StoreError>;
}

/// Run `work` in a transaction on `handle`
///
/// Commits if and only if `work` succeeds; the commit error, if any, is
/// returned as a [`TxPhase::Commit`] failure. When `work` fails the
/// transaction is rolled back and the original error is returned; a failed
/// rollback is logged and never replaces it.
pub async fn run_in_transaction<S, W>(
    handle: &StoreHandle<S>,
    work: W,
) -> Result<W::Output, TxError>
where
    S: Store,
    W: UnitOfWork<S::Tx>,
{
    run_in_transaction_until(handle, work, None).await
}

/// [`run_in_transaction`] with a deadline
///
/// When the deadline passes while queued on the gate, beginning, or running
/// `work`, the call fails with [`StoreError::TimedOut`] in that phase and any
/// open transaction is abandoned (rolled back on drop). Nothing is committed
/// in that case.
pub async fn run_in_transaction_until<S, W>(
    handle: &StoreHandle<S>,
    work: W,
    deadline: Option<Instant>,
) -> Result<W::Output, TxError>
where
    S: Store,
    W: UnitOfWork<S::Tx>,
{
    let store = handle.kind();
    let timed_out = |phase| TxError::new(store, phase, StoreError::TimedOut);
    handle.ensure_live()?;

    let access = work.access();
    let _gate = match access {
        AccessMode::ReadWrite => Some(
            within(deadline, handle.gate().acquire())
                .await
                .ok_or_else(|| timed_out(TxPhase::Admission))?,
        ),
        AccessMode::ReadOnly => None,
    };
    // The connection may have died while we were queued on the gate
    handle.ensure_live()?;

    let mut tx = within(deadline, handle.store().begin(TxOptions::repeatable_read(access)))
        .await
        .ok_or_else(|| timed_out(TxPhase::Begin))?
        .map_err(|e| TxError::new(store, TxPhase::Begin, e))?;

    let Some(result) = within(deadline, work.run(&mut tx)).await else {
        drop(tx);
        tracing::debug!(%store, "deadline elapsed, transaction abandoned");
        return Err(timed_out(TxPhase::Work));
    };

    match result {
        Ok(output) => {
            tx.commit()
                .await
                .map_err(|e| TxError::new(store, TxPhase::Commit, e))?;
            tracing::debug!(%store, ?access, "transaction committed");
            Ok(output)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(
                    %store,
                    error = %rollback_err,
                    original = %err,
                    "rollback failed"
                );
            }
            tracing::debug!(%store, error = %err, "transaction rolled back");
            Err(TxError::new(store, TxPhase::Work, err))
        }
    }
}

/// Await `fut`, giving up at `deadline`
async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
