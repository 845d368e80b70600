// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PostgreSQL-backed credentials and content stores

mod error;

pub use error::{map_sqlstate, map_sqlx_error, NO_DATA, UNIQUE_VIOLATION};

use async_trait::async_trait;
use sd_core::{
    AccessMode, ContentTransaction, CredentialsTransaction, IsolationLevel, Store, StoreError,
    StoreTransaction, TxOptions, UserId,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;
use std::marker::PhantomData;
use std::time::Duration;

/// Role marker for the credentials database (`sdusers_db`)
#[derive(Debug, Clone, Copy)]
pub enum Credentials {}

/// Role marker for the content database (`sd_db`)
#[derive(Debug, Clone, Copy)]
pub enum Content {}

pub type PgCredentialsStore = PgStore<Credentials>;
pub type PgContentStore = PgStore<Content>;

/// Pool settings shared by both stores
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 8,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// A connection pool bound to one database role
///
/// The role parameter keeps credentials operations off the content pool and
/// vice versa.
pub struct PgStore<R> {
    pool: PgPool,
    _role: PhantomData<fn() -> R>,
}

impl<R> Clone for PgStore<R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _role: PhantomData,
        }
    }
}

impl<R> std::fmt::Debug for PgStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("size", &self.pool.size())
            .field("idle", &self.pool.num_idle())
            .finish()
    }
}

impl<R> PgStore<R> {
    /// Connect a pool and verify the database answers
    pub async fn connect(url: &str, options: PoolOptions) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect(url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            _role: PhantomData,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Statement issued as the first command of every transaction
pub fn set_transaction_sql(options: TxOptions) -> &'static str {
    match (options.isolation, options.access) {
        (IsolationLevel::RepeatableRead, AccessMode::ReadWrite) => {
            "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ"
        }
        (IsolationLevel::RepeatableRead, AccessMode::ReadOnly) => {
            "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY"
        }
    }
}

#[async_trait]
impl<R: 'static> Store for PgStore<R> {
    type Tx = PgTransaction<R>;

    async fn begin(&self, options: TxOptions) -> Result<Self::Tx, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        // Dropping `tx` on failure queues the rollback
        sqlx::query(set_transaction_sql(options))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(PgTransaction {
            tx,
            _role: PhantomData,
        })
    }
}

/// An open PostgreSQL transaction
///
/// sqlx rolls back a dropped, unresolved transaction when the connection is
/// next returned to the pool.
pub struct PgTransaction<R> {
    tx: sqlx::Transaction<'static, Postgres>,
    _role: PhantomData<fn() -> R>,
}

#[async_trait]
impl<R: 'static> StoreTransaction for PgTransaction<R> {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl CredentialsTransaction for PgTransaction<Credentials> {
    async fn process_registration_confirmation(
        &mut self,
        confirmation_key: &str,
        nickname: &str,
    ) -> Result<UserId, StoreError> {
        // NULL means the key did not match a pending registration
        let id: Option<Option<i64>> =
            sqlx::query_scalar("select process_registrationconfirmation($1, $2)")
                .bind(confirmation_key)
                .bind(nickname)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(map_sqlx_error)?;
        id.flatten().map(UserId).ok_or(StoreError::NoRows)
    }
}

#[async_trait]
impl ContentTransaction for PgTransaction<Content> {
    async fn insert_user(&mut self, id: UserId, nickname: &str) -> Result<(), StoreError> {
        sqlx::query("insert into sduser2 (id, nickname) values ($1, $2)")
            .bind(id.0)
            .bind(nickname)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_user(&mut self, id: UserId) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar("select nickname from sduser2 where id = $1")
            .bind(id.0)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)
    }
}

#[cfg(test)]
#[path = "postgres_tests.rs"]
mod tests;
