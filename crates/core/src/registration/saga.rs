// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two-step registration saga
//!
//! Step 1 runs against the credentials store and, in one transaction,
//! validates the confirmation key, consumes it and allocates a user id.
//! Step 2 inserts the user record into the content store under that id.
//!
//! The steps commit independently. If step 1 commits and step 2 fails, the
//! user can log in but has no content record; the saga reports the failure
//! and does not compensate or retry.
//!
//! A deadline bounds each step's gate wait and work but never a commit. A
//! step 2 deadline after step 1 committed is reported as
//! [`RegistrationError::NotPromoted`], since the key is already consumed.

use crate::connection::StoreHandle;
use crate::coordinator::{run_in_transaction_until, UnitOfWork};
use crate::error::{StoreError, TxError};
use crate::fatal::{classify, FatalError, FatalEscalation, Severity};
use crate::store::{ContentTransaction, CredentialsTransaction, Store, StoreKind, UserId};
use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

/// Input validation failures; no store is contacted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required parameter: {0}")]
    Missing(&'static str),
    #[error("parameter must not be empty: {0}")]
    Empty(&'static str),
}

/// A validated confirmation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    nickname: String,
    confirmation_key: String,
}

impl RegistrationRequest {
    /// Surrounding whitespace is dropped from both parameters
    pub fn new(
        nickname: impl Into<String>,
        confirmation_key: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let nickname = nickname.into().trim().to_string();
        let confirmation_key = confirmation_key.into().trim().to_string();
        if nickname.is_empty() {
            return Err(ValidationError::Empty("nickname"));
        }
        if confirmation_key.is_empty() {
            return Err(ValidationError::Empty("confirmationkey"));
        }
        Ok(Self {
            nickname,
            confirmation_key,
        })
    }

    /// Build from optional request parameters
    pub fn from_params(
        nickname: Option<&str>,
        confirmation_key: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let nickname = nickname.ok_or(ValidationError::Missing("nickname"))?;
        let confirmation_key =
            confirmation_key.ok_or(ValidationError::Missing("confirmationkey"))?;
        Self::new(nickname, confirmation_key)
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn confirmation_key(&self) -> &str {
        &self.confirmation_key
    }
}

/// Result of a completed saga
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationOutcome {
    user_id: Option<UserId>,
    confirmed: bool,
}

impl RegistrationOutcome {
    fn confirmed(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            confirmed: true,
        }
    }

    /// Set only for confirmed outcomes
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("confirmation key is unknown or already used")]
    StaleKey,
    #[error("{store} store rejected a duplicate ({constraint})")]
    Conflict { store: StoreKind, constraint: String },
    #[error("{store} store rejected the request: {source}")]
    Rejected {
        store: StoreKind,
        #[source]
        source: StoreError,
    },
    #[error("server is shutting down")]
    ShuttingDown,
    /// Nothing was committed; the request can be retried
    #[error("{store} store did not finish before the request deadline")]
    TimedOut { store: StoreKind },
    /// Step 1 committed but step 2 missed the deadline
    #[error("user {user_id} confirmed but not promoted before the request deadline")]
    NotPromoted { user_id: UserId },
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// Step 1: validate, consume the key and allocate the user id
struct ConfirmAndAllocate {
    nickname: String,
    confirmation_key: String,
}

#[async_trait]
impl<T: CredentialsTransaction> UnitOfWork<T> for ConfirmAndAllocate {
    type Output = UserId;

    async fn run(self, tx: &mut T) -> Result<UserId, StoreError> {
        tx.process_registration_confirmation(&self.confirmation_key, &self.nickname)
            .await
    }
}

/// Step 2: copy the user into the content store
struct PromoteUser {
    id: UserId,
    nickname: String,
}

#[async_trait]
impl<T: ContentTransaction> UnitOfWork<T> for PromoteUser {
    type Output = ();

    async fn run(self, tx: &mut T) -> Result<(), StoreError> {
        tx.insert_user(self.id, &self.nickname).await
    }
}

/// Orchestrates registration confirmation across both stores
#[derive(Debug, Clone)]
pub struct RegistrationSaga<C, D> {
    credentials: StoreHandle<C>,
    content: StoreHandle<D>,
    escalation: FatalEscalation,
}

impl<C, D> RegistrationSaga<C, D>
where
    C: Store,
    C::Tx: CredentialsTransaction,
    D: Store,
    D::Tx: ContentTransaction,
{
    pub fn new(
        credentials: StoreHandle<C>,
        content: StoreHandle<D>,
        escalation: FatalEscalation,
    ) -> Self {
        Self {
            credentials,
            content,
            escalation,
        }
    }

    pub fn credentials(&self) -> &StoreHandle<C> {
        &self.credentials
    }

    pub fn content(&self) -> &StoreHandle<D> {
        &self.content
    }

    pub fn escalation(&self) -> &FatalEscalation {
        &self.escalation
    }

    /// Confirm a registration; the outcome is confirmed only if both steps committed
    pub async fn confirm_registration(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        self.confirm(request, None).await
    }

    /// [`confirm_registration`](Self::confirm_registration), giving up on
    /// uncommitted work at `deadline`
    pub async fn confirm_registration_by(
        &self,
        request: &RegistrationRequest,
        deadline: Instant,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        self.confirm(request, Some(deadline)).await
    }

    async fn confirm(
        &self,
        request: &RegistrationRequest,
        deadline: Option<Instant>,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let nickname = request.nickname();

        let user_id = run_in_transaction_until(
            &self.credentials,
            ConfirmAndAllocate {
                nickname: nickname.to_string(),
                confirmation_key: request.confirmation_key().to_string(),
            },
            deadline,
        )
        .await
        .map_err(|err| self.recover_or_escalate(err, &self.credentials))?;

        tracing::info!(%user_id, nickname, "confirmation key consumed, user allocated");

        run_in_transaction_until(
            &self.content,
            PromoteUser {
                id: user_id,
                nickname: nickname.to_string(),
            },
            deadline,
        )
        .await
        .map_err(|err| {
            // The credentials commit stands: the user can log in but has no content record
            tracing::error!(
                %user_id,
                nickname,
                error = %err,
                "user allocated but not promoted to content store"
            );
            match self.recover_or_escalate(err, &self.content) {
                RegistrationError::TimedOut { .. } => RegistrationError::NotPromoted { user_id },
                other => other,
            }
        })?;

        tracing::info!(%user_id, nickname, "user promoted to content store");
        Ok(RegistrationOutcome::confirmed(user_id))
    }

    fn recover_or_escalate<S: Store>(
        &self,
        err: TxError,
        handle: &StoreHandle<S>,
    ) -> RegistrationError {
        match classify(&err) {
            Severity::Fatal => RegistrationError::Fatal(self.escalation.handle_fatal(err, handle)),
            Severity::Recoverable => match (err.store, err.source) {
                (StoreKind::Credentials, StoreError::NoRows) => RegistrationError::StaleKey,
                (store, StoreError::TimedOut) => RegistrationError::TimedOut { store },
                (store, StoreError::UniqueViolation { constraint }) => {
                    RegistrationError::Conflict { store, constraint }
                }
                (store, source) => RegistrationError::Rejected { store, source },
            },
        }
    }
}

#[cfg(test)]
#[path = "saga_tests.rs"]
mod tests;
