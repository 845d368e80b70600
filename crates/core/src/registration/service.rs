// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boundary between the saga and the hosting layer
//!
//! Every failure leaves this module as a [`Rejection`] value carrying a
//! user-facing message. Fatal failures get the same generic message whatever
//! went wrong underneath.

use super::saga::{RegistrationError, RegistrationOutcome, RegistrationRequest, RegistrationSaga};
use crate::config::CoreConfig;
use crate::shutdown::ShutdownController;
use crate::store::{ContentTransaction, CredentialsTransaction, Store, StoreKind};
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Malformed request, or a key that cannot be used
    BadRequest,
    Conflict,
    /// The process is shutting down
    Unavailable,
    ServerError,
}

/// Failure outcome handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub message: String,
}

impl Rejection {
    fn new(kind: RejectionKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_string(),
        }
    }
}

impl From<&RegistrationError> for Rejection {
    fn from(err: &RegistrationError) -> Self {
        match err {
            RegistrationError::Validation(_) => {
                Rejection::new(RejectionKind::BadRequest, "Bad registration confirmation URL")
            }
            RegistrationError::StaleKey => Rejection::new(
                RejectionKind::BadRequest,
                "Failed to confirm registration, sorry. The link is invalid or was already used",
            ),
            RegistrationError::Conflict {
                store: StoreKind::Credentials,
                ..
            } => Rejection::new(
                RejectionKind::Conflict,
                "This nickname is already registered",
            ),
            RegistrationError::Conflict {
                store: StoreKind::Content,
                ..
            } => Rejection::new(
                RejectionKind::Conflict,
                "Failed to add user to the dictionary database",
            ),
            RegistrationError::Rejected { .. } => Rejection::new(
                RejectionKind::BadRequest,
                "Failed to confirm registration, sorry",
            ),
            RegistrationError::ShuttingDown => Rejection::new(
                RejectionKind::Unavailable,
                "The server is shutting down, please try again later",
            ),
            RegistrationError::TimedOut { .. } => Rejection::new(
                RejectionKind::ServerError,
                "The request took too long, please try again",
            ),
            RegistrationError::NotPromoted { .. } => Rejection::new(
                RejectionKind::ServerError,
                "Your registration was confirmed but your dictionary account could not be set up. \
                 Please contact the administrator; the confirmation link cannot be used again",
            ),
            RegistrationError::Fatal(_) => Rejection::new(RejectionKind::ServerError, "Internal error"),
        }
    }
}

/// Entry point for registration confirmations
#[derive(Debug, Clone)]
pub struct RegistrationService<C, D> {
    saga: RegistrationSaga<C, D>,
    config: CoreConfig,
}

impl<C, D> RegistrationService<C, D>
where
    C: Store,
    C::Tx: CredentialsTransaction,
    D: Store,
    D::Tx: ContentTransaction,
{
    pub fn new(saga: RegistrationSaga<C, D>, config: CoreConfig) -> Self {
        Self { saga, config }
    }

    pub fn saga(&self) -> &RegistrationSaga<C, D> {
        &self.saga
    }

    pub fn shutdown(&self) -> &ShutdownController {
        self.saga.escalation().shutdown()
    }

    /// Confirm a registration from raw request parameters
    pub async fn confirm(
        &self,
        nickname: Option<&str>,
        confirmation_key: Option<&str>,
    ) -> Result<RegistrationOutcome, Rejection> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("registration.confirm", %request_id);

        async {
            let result = self.confirm_inner(nickname, confirmation_key).await;
            match &result {
                Ok(outcome) => tracing::info!(user_id = ?outcome.user_id(), "registration confirmed"),
                Err(RegistrationError::Fatal(_)) => {
                    tracing::error!("registration failed on a fatal store error")
                }
                Err(err) => tracing::warn!(error = %err, "registration rejected"),
            }
            result.map_err(|err| Rejection::from(&err))
        }
        .instrument(span)
        .await
    }

    async fn confirm_inner(
        &self,
        nickname: Option<&str>,
        confirmation_key: Option<&str>,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let Some(_in_flight) = self.shutdown().admit() else {
            return Err(RegistrationError::ShuttingDown);
        };

        let request = RegistrationRequest::from_params(nickname, confirmation_key)?;

        // Bounds the gate waits and work of each step; commits always run to completion
        let deadline = Instant::now() + self.config.request_timeout;
        self.saga.confirm_registration_by(&request, deadline).await
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
