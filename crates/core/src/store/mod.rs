// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store abstraction for the credentials and content databases

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{
    ContentData, CredentialsData, FakeContentStore, FakeCredentialsStore, FakeData, FakeStore,
    FakeTransaction, StoreCall,
};

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identifier allocated by the credentials store for a confirmed user
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which of the two databases a handle or error belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// Login identities and confirmation keys (`sdusers_db`)
    Credentials,
    /// User-facing dictionary records (`sd_db`)
    Content,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::Credentials => write!(f, "credentials"),
            StoreKind::Content => write!(f, "content"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsolationLevel {
    RepeatableRead,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

/// Options passed to [`Store::begin`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub access: AccessMode,
}

impl TxOptions {
    pub fn repeatable_read(access: AccessMode) -> Self {
        Self {
            isolation: IsolationLevel::RepeatableRead,
            access,
        }
    }
}

/// A transactional data store
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    type Tx: StoreTransaction;

    /// Open a new transaction
    async fn begin(&self, options: TxOptions) -> Result<Self::Tx, StoreError>;
}

/// One unit of work against a store
///
/// `commit` and `rollback` consume the handle, so it is resolved at most once.
/// Implementations must roll back when an unresolved handle is dropped; this
/// covers cancelled futures and unwinding.
#[async_trait]
pub trait StoreTransaction: Send + 'static {
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Operations available inside a credentials store transaction
#[async_trait]
pub trait CredentialsTransaction: StoreTransaction {
    /// Validate the key against the nickname, consume it and allocate a user id
    ///
    /// Fails with [`StoreError::NoRows`] for an unknown or already consumed key.
    async fn process_registration_confirmation(
        &mut self,
        confirmation_key: &str,
        nickname: &str,
    ) -> Result<UserId, StoreError>;
}

/// Operations available inside a content store transaction
#[async_trait]
pub trait ContentTransaction: StoreTransaction {
    /// Insert the user record; a duplicate id is a [`StoreError::UniqueViolation`]
    async fn insert_user(&mut self, id: UserId, nickname: &str) -> Result<(), StoreError>;

    async fn find_user(&mut self, id: UserId) -> Result<Option<String>, StoreError>;
}
