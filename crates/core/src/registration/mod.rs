// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registration confirmation
//!
//! - **RegistrationSaga** - confirm in the credentials store, then promote to the content store
//! - **RegistrationService** - admission, validation and the request deadline, and the
//!   conversion of errors into user-facing rejections

mod saga;
mod service;

pub use saga::{
    RegistrationError, RegistrationOutcome, RegistrationRequest, RegistrationSaga,
    ValidationError,
};
pub use service::{Rejection, RejectionKind, RegistrationService};
