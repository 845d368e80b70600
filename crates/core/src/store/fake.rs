// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory stores for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{
    AccessMode, ContentTransaction, CredentialsTransaction, Store, StoreTransaction, TxOptions,
    UserId,
};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Recorded store call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Begin(TxOptions),
    ConfirmRegistration {
        confirmation_key: String,
        nickname: String,
    },
    InsertUser {
        id: UserId,
        nickname: String,
    },
    FindUser {
        id: UserId,
    },
    Commit,
    Rollback,
    /// Transaction dropped without commit or rollback (implicit rollback)
    Abandoned,
}

/// Data held by a fake store; transactions work on a copy taken at begin
pub trait FakeData: Clone + Default + Send + 'static {}

impl<T: Clone + Default + Send + 'static> FakeData for T {}

/// One-shot injected failures
#[derive(Debug, Default)]
struct Faults {
    begin: Option<StoreError>,
    operation: Option<StoreError>,
    commit: Option<StoreError>,
    rollback: Option<StoreError>,
    commit_delay: Option<Duration>,
}

struct FakeState<D> {
    data: D,
    calls: Vec<StoreCall>,
    faults: Faults,
}

/// Fake transactional store
pub struct FakeStore<D> {
    state: Arc<Mutex<FakeState<D>>>,
}

impl<D> Clone for FakeStore<D> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<D: FakeData> Default for FakeStore<D> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                data: D::default(),
                calls: Vec::new(),
                faults: Faults::default(),
            })),
        }
    }
}

impl<D: FakeData> FakeStore<D> {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut FakeState<D>) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<StoreCall> {
        self.with_state(|state| state.calls.clone())
    }

    /// Number of `begin` calls that reached the store
    pub fn begin_count(&self) -> usize {
        self.count(|call| matches!(call, StoreCall::Begin(_)))
    }

    pub fn commit_count(&self) -> usize {
        self.count(|call| matches!(call, StoreCall::Commit))
    }

    /// Explicit and implicit rollbacks
    pub fn rollback_count(&self) -> usize {
        self.count(|call| matches!(call, StoreCall::Rollback | StoreCall::Abandoned))
    }

    fn count(&self, pred: impl Fn(&StoreCall) -> bool) -> usize {
        self.with_state(|state| state.calls.iter().filter(|c| pred(c)).count())
    }

    /// Committed data
    pub fn snapshot(&self) -> D {
        self.with_state(|state| state.data.clone())
    }

    pub fn fail_next_begin(&self, err: StoreError) {
        self.with_state(|state| state.faults.begin = Some(err));
    }

    /// Fail the next data operation (confirm, insert, find)
    pub fn fail_next_operation(&self, err: StoreError) {
        self.with_state(|state| state.faults.operation = Some(err));
    }

    pub fn fail_next_commit(&self, err: StoreError) {
        self.with_state(|state| state.faults.commit = Some(err));
    }

    pub fn fail_next_rollback(&self, err: StoreError) {
        self.with_state(|state| state.faults.rollback = Some(err));
    }

    /// Hold the next commit for `delay` before applying it
    pub fn delay_next_commit(&self, delay: Duration) {
        self.with_state(|state| state.faults.commit_delay = Some(delay));
    }
}

#[async_trait]
impl<D: FakeData> Store for FakeStore<D> {
    type Tx = FakeTransaction<D>;

    async fn begin(&self, options: TxOptions) -> Result<FakeTransaction<D>, StoreError> {
        let working = self.with_state(|state| {
            state.calls.push(StoreCall::Begin(options));
            match state.faults.begin.take() {
                Some(err) => Err(err),
                None => Ok(state.data.clone()),
            }
        })?;

        Ok(FakeTransaction {
            store: self.clone(),
            working,
            access: options.access,
            resolved: false,
        })
    }
}

/// Transaction over a snapshot of the fake store's data
pub struct FakeTransaction<D: FakeData> {
    store: FakeStore<D>,
    working: D,
    access: AccessMode,
    resolved: bool,
}

impl<D: FakeData> FakeTransaction<D> {
    fn record(&self, call: StoreCall) -> Result<(), StoreError> {
        self.store.with_state(|state| {
            state.calls.push(call);
            state.faults.operation.take().map_or(Ok(()), Err)
        })
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        match self.access {
            AccessMode::ReadWrite => Ok(()),
            AccessMode::ReadOnly => Err(StoreError::Driver(
                "cannot execute write in a read-only transaction".to_string(),
            )),
        }
    }
}

#[async_trait]
impl<D: FakeData> StoreTransaction for FakeTransaction<D> {
    async fn commit(mut self) -> Result<(), StoreError> {
        self.resolved = true;
        let working = std::mem::take(&mut self.working);
        let access = self.access;
        let delay = self.store.with_state(|state| state.faults.commit_delay.take());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.store.with_state(|state| {
            state.calls.push(StoreCall::Commit);
            if let Some(err) = state.faults.commit.take() {
                return Err(err);
            }
            if access == AccessMode::ReadWrite {
                state.data = working;
            }
            Ok(())
        })
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.resolved = true;
        self.store.with_state(|state| {
            state.calls.push(StoreCall::Rollback);
            state.faults.rollback.take().map_or(Ok(()), Err)
        })
    }
}

impl<D: FakeData> Drop for FakeTransaction<D> {
    fn drop(&mut self) {
        if !self.resolved {
            self.store
                .with_state(|state| state.calls.push(StoreCall::Abandoned));
        }
    }
}

// =============================================================================
// Credentials store
// =============================================================================

/// Pending confirmations and allocated identities
#[derive(Debug, Clone, Default)]
pub struct CredentialsData {
    /// confirmation key -> nickname
    pending: HashMap<String, String>,
    users: BTreeMap<UserId, String>,
    last_id: i64,
}

impl CredentialsData {
    pub fn users(&self) -> &BTreeMap<UserId, String> {
        &self.users
    }

    pub fn is_pending(&self, confirmation_key: &str) -> bool {
        self.pending.contains_key(confirmation_key)
    }
}

pub type FakeCredentialsStore = FakeStore<CredentialsData>;

impl FakeStore<CredentialsData> {
    /// Register a pending confirmation key for a nickname
    pub fn add_registration(&self, confirmation_key: &str, nickname: &str) {
        self.with_state(|state| {
            state
                .data
                .pending
                .insert(confirmation_key.to_string(), nickname.to_string());
        });
    }

    pub fn users(&self) -> BTreeMap<UserId, String> {
        self.with_state(|state| state.data.users.clone())
    }
}

#[async_trait]
impl CredentialsTransaction for FakeTransaction<CredentialsData> {
    async fn process_registration_confirmation(
        &mut self,
        confirmation_key: &str,
        nickname: &str,
    ) -> Result<UserId, StoreError> {
        self.record(StoreCall::ConfirmRegistration {
            confirmation_key: confirmation_key.to_string(),
            nickname: nickname.to_string(),
        })?;
        self.ensure_writable()?;

        let data = &mut self.working;
        if data.pending.get(confirmation_key).map(String::as_str) != Some(nickname) {
            return Err(StoreError::NoRows);
        }
        if data.users.values().any(|n| n == nickname) {
            return Err(StoreError::UniqueViolation {
                constraint: "sduser_nickname_key".to_string(),
            });
        }

        data.pending.remove(confirmation_key);
        data.last_id += 1;
        let id = UserId(data.last_id);
        data.users.insert(id, nickname.to_string());
        Ok(id)
    }
}

// =============================================================================
// Content store
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct ContentData {
    users: BTreeMap<UserId, String>,
}

impl ContentData {
    pub fn users(&self) -> &BTreeMap<UserId, String> {
        &self.users
    }
}

pub type FakeContentStore = FakeStore<ContentData>;

impl FakeStore<ContentData> {
    /// Insert a user record directly, bypassing transactions
    pub fn seed_user(&self, id: UserId, nickname: &str) {
        self.with_state(|state| {
            state.data.users.insert(id, nickname.to_string());
        });
    }

    pub fn users(&self) -> BTreeMap<UserId, String> {
        self.with_state(|state| state.data.users.clone())
    }
}

#[async_trait]
impl ContentTransaction for FakeTransaction<ContentData> {
    async fn insert_user(&mut self, id: UserId, nickname: &str) -> Result<(), StoreError> {
        self.record(StoreCall::InsertUser {
            id,
            nickname: nickname.to_string(),
        })?;
        self.ensure_writable()?;

        if self.working.users.contains_key(&id) {
            return Err(StoreError::UniqueViolation {
                constraint: "sduser2_pkey".to_string(),
            });
        }
        self.working.users.insert(id, nickname.to_string());
        Ok(())
    }

    async fn find_user(&mut self, id: UserId) -> Result<Option<String>, StoreError> {
        self.record(StoreCall::FindUser { id })?;
        Ok(self.working.users.get(&id).cloned())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
