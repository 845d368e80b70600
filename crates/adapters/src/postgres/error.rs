// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mapping from sqlx errors to [`StoreError`]

use sd_core::StoreError;

/// SQLSTATE `unique_violation`
pub const UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE `no_data`
pub const NO_DATA: &str = "02000";

/// Map a server-reported SQLSTATE to a store error
pub fn map_sqlstate(code: Option<&str>, constraint: Option<&str>, message: &str) -> StoreError {
    match code {
        Some(UNIQUE_VIOLATION) => StoreError::UniqueViolation {
            constraint: constraint.unwrap_or_default().to_string(),
        },
        Some(NO_DATA) => StoreError::NoRows,
        // connection_exception class and admin/crash shutdowns
        Some(c) if c.starts_with("08") || c.starts_with("57P") => {
            StoreError::Unavailable(message.to_string())
        }
        _ => StoreError::Driver(message.to_string()),
    }
}

pub fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code();
            map_sqlstate(code.as_deref(), db.constraint(), db.message())
        }
        sqlx::Error::RowNotFound => StoreError::NoRows,
        sqlx::Error::Io(e) => StoreError::Unavailable(e.to_string()),
        sqlx::Error::Tls(e) => StoreError::Unavailable(e.to_string()),
        sqlx::Error::PoolTimedOut => StoreError::Unavailable("pool timed out".to_string()),
        sqlx::Error::PoolClosed => StoreError::Unavailable("pool closed".to_string()),
        sqlx::Error::WorkerCrashed => StoreError::Unavailable("worker crashed".to_string()),
        sqlx::Error::Protocol(msg) => StoreError::Protocol(msg),
        other => StoreError::Driver(other.to_string()),
    }
}
