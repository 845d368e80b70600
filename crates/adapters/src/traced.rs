// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced store wrappers for consistent observability

use async_trait::async_trait;
use sd_core::{
    ContentTransaction, CredentialsTransaction, Store, StoreError, StoreKind, StoreTransaction,
    TxOptions, UserId,
};
use std::time::Instant;
use tracing::Instrument;

/// Wrapper that adds tracing to any Store
#[derive(Clone, Debug)]
pub struct TracedStore<S> {
    kind: StoreKind,
    inner: S,
}

impl<S> TracedStore<S> {
    pub fn new(kind: StoreKind, inner: S) -> Self {
        Self { kind, inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: Store> Store for TracedStore<S> {
    type Tx = TracedTransaction<S::Tx>;

    async fn begin(&self, options: TxOptions) -> Result<Self::Tx, StoreError> {
        let span = tracing::info_span!("store.begin", store = %self.kind, access = ?options.access);
        async {
            let start = Instant::now();
            let result = self.inner.begin(options).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(tx) => {
                    tracing::debug!(elapsed_ms, "transaction opened");
                    Ok(TracedTransaction {
                        kind: self.kind,
                        opened: Instant::now(),
                        inner: tx,
                    })
                }
                Err(e) => {
                    tracing::error!(elapsed_ms, error = %e, "begin failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Transaction returned by [`TracedStore`]
pub struct TracedTransaction<T> {
    kind: StoreKind,
    opened: Instant,
    inner: T,
}

impl<T> TracedTransaction<T> {
    fn open_ms(&self) -> u64 {
        self.opened.elapsed().as_millis() as u64
    }
}

#[async_trait]
impl<T: StoreTransaction> StoreTransaction for TracedTransaction<T> {
    async fn commit(self) -> Result<(), StoreError> {
        let span = tracing::info_span!("store.commit", store = %self.kind);
        let open_ms = self.open_ms();
        async move {
            let result = self.inner.commit().await;
            match &result {
                Ok(()) => tracing::debug!(open_ms, "committed"),
                Err(e) => tracing::error!(open_ms, error = %e, "commit failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn rollback(self) -> Result<(), StoreError> {
        let span = tracing::info_span!("store.rollback", store = %self.kind);
        let open_ms = self.open_ms();
        async move {
            let result = self.inner.rollback().await;
            match &result {
                Ok(()) => tracing::debug!(open_ms, "rolled back"),
                Err(e) => tracing::warn!(open_ms, error = %e, "rollback failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl<T: CredentialsTransaction> CredentialsTransaction for TracedTransaction<T> {
    async fn process_registration_confirmation(
        &mut self,
        confirmation_key: &str,
        nickname: &str,
    ) -> Result<UserId, StoreError> {
        let span = tracing::info_span!("credentials.confirm", nickname);
        async {
            let result = self
                .inner
                .process_registration_confirmation(confirmation_key, nickname)
                .await;
            match &result {
                Ok(id) => tracing::info!(user_id = %id, "registration confirmed"),
                // Expected for stale links; not an operator problem
                Err(StoreError::NoRows) => tracing::info!("confirmation key not accepted"),
                Err(e @ StoreError::UniqueViolation { .. }) => {
                    tracing::warn!(error = %e, "confirmation conflicts")
                }
                Err(e) => tracing::error!(error = %e, "confirmation failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl<T: ContentTransaction> ContentTransaction for TracedTransaction<T> {
    async fn insert_user(&mut self, id: UserId, nickname: &str) -> Result<(), StoreError> {
        let span = tracing::info_span!("content.insert_user", user_id = %id, nickname);
        async {
            let result = self.inner.insert_user(id, nickname).await;
            match &result {
                Ok(()) => tracing::info!("user record inserted"),
                Err(e @ StoreError::UniqueViolation { .. }) => {
                    tracing::warn!(error = %e, "user record already exists")
                }
                Err(e) => tracing::error!(error = %e, "insert failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn find_user(&mut self, id: UserId) -> Result<Option<String>, StoreError> {
        let result = self.inner.find_user(id).await;
        tracing::trace!(user_id = %id, found = ?result.as_ref().map(Option::is_some).ok(), "looked up user");
        result
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
