// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Store adapters for the credentials and content databases

pub mod postgres;
pub mod traced;

pub use postgres::{
    map_sqlx_error, Content, Credentials, PgContentStore, PgCredentialsStore, PgStore,
    PgTransaction, PoolOptions,
};
pub use traced::{TracedStore, TracedTransaction};
