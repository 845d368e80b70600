// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! sd-core: registration consistency core for the semantic dictionary
//!
//! This crate provides:
//! - Connection liveness tracking with irreversible quarantine
//! - A per-store write serialization gate
//! - A transaction coordinator with repeatable-read, commit-or-rollback discipline
//! - Fatal error classification and the Running/Draining/Stopped shutdown state
//! - The two-step registration saga across the credentials and content stores

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod fatal;
pub mod gate;
pub mod liveness;
pub mod registration;
pub mod shutdown;
pub mod store;

// Re-exports
pub use config::CoreConfig;
pub use connection::StoreHandle;
pub use coordinator::{run_in_transaction, run_in_transaction_until, UnitOfWork};
pub use error::{StoreError, TxError, TxPhase};
pub use fatal::{classify, FatalError, FatalEscalation, Severity};
pub use gate::{GateGuard, WriteGate};
pub use liveness::{ConnectionState, Liveness};
pub use registration::{
    Rejection, RejectionKind, RegistrationError, RegistrationOutcome, RegistrationRequest,
    RegistrationSaga, RegistrationService, ValidationError,
};
pub use shutdown::{DrainCause, InFlight, ProcessPhase, ShutdownController};
pub use store::{
    AccessMode, ContentTransaction, CredentialsTransaction, IsolationLevel, Store, StoreKind,
    StoreTransaction, TxOptions, UserId,
};

#[cfg(any(test, feature = "test-support"))]
pub use store::{
    ContentData, CredentialsData, FakeContentStore, FakeCredentialsStore, FakeStore,
    FakeTransaction, StoreCall,
};
