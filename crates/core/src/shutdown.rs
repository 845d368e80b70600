// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process shutdown state and draining
//!
//! Transitions: `Running` → `Draining` → `Stopped`. Both edges are one-way and
//! taken with a compare-and-swap, so any number of concurrent fatal reports
//! collapse into a single transition.
//!
//! While draining, [`ShutdownController::admit`] refuses new work and in-flight
//! requests are left to finish. The move to `Stopped` happens once the last
//! in-flight request completes or the drain timeout elapses, whichever is first.
//! Draining never aborts a running transaction.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessPhase {
    Running = 0,
    Draining = 1,
    Stopped = 2,
}

impl ProcessPhase {
    fn from_u8(val: u8) -> Self {
        match val {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Why draining started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainCause {
    /// A store failed in a way that makes further work unsafe
    Fatal(String),
    /// The host asked for shutdown (signal, operator)
    Requested(String),
}

impl DrainCause {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DrainCause::Fatal(_))
    }
}

impl std::fmt::Display for DrainCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrainCause::Fatal(reason) => write!(f, "fatal: {}", reason),
            DrainCause::Requested(reason) => write!(f, "requested: {}", reason),
        }
    }
}

type ShutdownHook = Box<dyn FnOnce() + Send>;

struct Inner {
    phase: AtomicU8,
    phase_tx: watch::Sender<ProcessPhase>,
    cause: OnceLock<DrainCause>,
    in_flight: AtomicUsize,
    idle: Notify,
    hooks: Mutex<Vec<ShutdownHook>>,
    drain_timeout: Duration,
}

impl Inner {
    fn phase(&self) -> ProcessPhase {
        ProcessPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Watchers are notified separately, once the new phase's state is in place
    fn transition(&self, from: ProcessPhase, to: ProcessPhase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn announce(&self, phase: ProcessPhase) {
        self.phase_tx.send_replace(phase);
    }
}

/// Process-wide shutdown state, shared by cloning
#[derive(Clone)]
pub struct ShutdownController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ShutdownController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownController")
            .field("phase", &self.phase())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl ShutdownController {
    pub fn new(drain_timeout: Duration) -> Self {
        let (phase_tx, _) = watch::channel(ProcessPhase::Running);
        Self {
            inner: Arc::new(Inner {
                phase: AtomicU8::new(ProcessPhase::Running as u8),
                phase_tx,
                cause: OnceLock::new(),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                hooks: Mutex::new(Vec::new()),
                drain_timeout,
            }),
        }
    }

    pub fn phase(&self) -> ProcessPhase {
        self.inner.phase()
    }

    pub fn is_running(&self) -> bool {
        self.phase() == ProcessPhase::Running
    }

    /// Cause recorded by the call that started draining
    pub fn drain_cause(&self) -> Option<&DrainCause> {
        self.inner.cause.get()
    }

    /// Upper bound on the wait for in-flight work once draining starts
    pub fn drain_timeout(&self) -> Duration {
        self.inner.drain_timeout
    }

    pub fn subscribe(&self) -> watch::Receiver<ProcessPhase> {
        self.inner.phase_tx.subscribe()
    }

    /// Number of admitted requests that have not finished yet
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Register a callback to run when draining starts
    ///
    /// Runs immediately if draining has already started.
    pub fn on_draining(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = self.inner.hooks.lock().unwrap_or_else(|e| e.into_inner());
        if self.phase() == ProcessPhase::Running {
            hooks.push(Box::new(hook));
            return;
        }
        drop(hooks);
        hook();
    }

    /// Admit one unit of inbound work; `None` once draining has started
    pub fn admit(&self) -> Option<InFlight> {
        if !self.is_running() {
            return None;
        }
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        let permit = InFlight {
            inner: Arc::clone(&self.inner),
        };
        // Lost a race with begin_draining; dropping the permit undoes the count
        if !self.is_running() {
            return None;
        }
        Some(permit)
    }

    /// Move from `Running` to `Draining`
    ///
    /// Returns `true` for the single call that performed the transition. That
    /// call records the cause, runs the draining hooks and schedules the move to
    /// `Stopped` on the current tokio runtime.
    pub fn begin_draining(&self, cause: DrainCause) -> bool {
        // Recording the cause picks the winner; the phase moves only after it
        // is set, so `Draining` is never observed without a cause.
        if let Err(cause) = self.inner.cause.set(cause) {
            debug!(%cause, phase = ?self.phase(), "already shutting down");
            return false;
        }
        if !self
            .inner
            .transition(ProcessPhase::Running, ProcessPhase::Draining)
        {
            return false;
        }

        if let Some(cause) = self.drain_cause() {
            warn!(%cause, in_flight = self.in_flight(), "draining, new work is refused");
        }
        self.inner.announce(ProcessPhase::Draining);

        let hooks = std::mem::take(
            &mut *self.inner.hooks.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for hook in hooks {
            hook();
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let this = self.clone();
                runtime.spawn(async move { this.finish_draining().await });
            }
            Err(_) => warn!("no async runtime, finish_draining must be driven by the host"),
        }
        true
    }

    /// Wait for in-flight work (bounded by the drain timeout), then stop
    ///
    /// Does nothing unless the process is draining.
    pub async fn finish_draining(&self) {
        if self.phase() != ProcessPhase::Draining {
            return;
        }

        let inner = &self.inner;
        let idle = async {
            loop {
                let notified = inner.idle.notified();
                if inner.in_flight.load(Ordering::Acquire) == 0 {
                    return;
                }
                notified.await;
            }
        };

        if tokio::time::timeout(inner.drain_timeout, idle).await.is_err() {
            warn!(
                in_flight = self.in_flight(),
                timeout_ms = inner.drain_timeout.as_millis() as u64,
                "drain timeout elapsed with work still in flight"
            );
        }

        if inner.transition(ProcessPhase::Draining, ProcessPhase::Stopped) {
            inner.announce(ProcessPhase::Stopped);
            info!("stopped");
        }
    }

    /// Resolve once the process has reached `Stopped`
    pub async fn wait_stopped(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|phase| *phase == ProcessPhase::Stopped).await;
    }
}

/// Admission permit for one in-flight request; finishing the request drops it
#[derive(Debug)]
pub struct InFlight {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
#[path = "shutdown_tests.rs"]
mod tests;
