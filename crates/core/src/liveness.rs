// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection liveness tracking
//!
//! A connection starts `Live` and moves to `Dead` on the first fatal error.
//! The transition is one-way: a quarantined connection is never reused.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Live = 0,
    Dead = 1,
}

impl ConnectionState {
    fn from_u8(val: u8) -> Self {
        match val {
            0 => Self::Live,
            _ => Self::Dead,
        }
    }
}

/// Shared liveness flag for one store connection
#[derive(Debug, Clone)]
pub struct Liveness {
    state: Arc<AtomicU8>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ConnectionState::Live as u8)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_live(&self) -> bool {
        self.state() == ConnectionState::Live
    }

    /// Mark the connection dead
    ///
    /// Returns `true` only for the call that performed the transition.
    pub(crate) fn quarantine(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Live as u8,
                ConnectionState::Dead as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_live() {
        let liveness = Liveness::new();
        assert!(liveness.is_live());
        assert_eq!(liveness.state(), ConnectionState::Live);
    }

    #[test]
    fn quarantine_is_one_way_and_reported_once() {
        let liveness = Liveness::new();
        let shared = liveness.clone();

        assert!(liveness.quarantine());
        assert!(!shared.quarantine());
        assert!(!liveness.quarantine());
        assert_eq!(shared.state(), ConnectionState::Dead);
    }

    #[test]
    fn concurrent_quarantine_has_single_winner() {
        let liveness = Liveness::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let l = liveness.clone();
                std::thread::spawn(move || l.quarantine())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(!liveness.is_live());
    }
}
