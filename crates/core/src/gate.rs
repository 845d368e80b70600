// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write serialization gate
//!
//! One gate per store admits a single write transaction at a time. Waiters are
//! served in FIFO order. The gate is not reentrant: acquiring it twice from the
//! same unit of work deadlocks.
//!
//! Release happens when the [`GateGuard`] is dropped, so every exit path
//! (error, cancellation, unwinding) releases exactly once and a release
//! without a prior acquire cannot be expressed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct GateCounters {
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Per-store exclusive gate for write transactions
#[derive(Debug, Clone, Default)]
pub struct WriteGate {
    lock: Arc<Mutex<()>>,
    counters: Arc<GateCounters>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the gate is free and take it
    pub(crate) async fn acquire(&self) -> GateGuard {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        self.counters.acquired.fetch_add(1, Ordering::AcqRel);
        GateGuard {
            _guard: guard,
            counters: Arc::clone(&self.counters),
        }
    }

    /// Total number of acquisitions
    pub fn acquisitions(&self) -> u64 {
        self.counters.acquired.load(Ordering::Acquire)
    }

    /// Total number of releases
    pub fn releases(&self) -> u64 {
        self.counters.released.load(Ordering::Acquire)
    }

    /// Check if a write transaction currently holds the gate
    pub fn is_held(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

/// Proof of holding a [`WriteGate`]; releases on drop
#[derive(Debug)]
pub struct GateGuard {
    _guard: OwnedMutexGuard<()>,
    counters: Arc<GateCounters>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
