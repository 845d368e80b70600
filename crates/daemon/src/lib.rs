// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Host process for the registration confirmation endpoint

pub mod lifecycle;
pub mod server;

pub use lifecycle::{
    build_service, notify_ready, notify_stopping, setup_logging, startup, Config, DaemonState,
    LifecycleError, StopStatus,
};
pub use server::{router, serve, HttpConfig, TlsConfig};
