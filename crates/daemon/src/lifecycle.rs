// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: configuration, logging, startup, shutdown.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use sd_adapters::{PgContentStore, PgCredentialsStore, PoolOptions, TracedStore};
use axum_server::tls_rustls::RustlsConfig;
use sd_core::{
    ContentTransaction, CoreConfig, CredentialsTransaction, FatalEscalation, RegistrationSaga,
    RegistrationService, ShutdownController, Store, StoreError, StoreHandle, StoreKind,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use crate::server::{HttpConfig, MIN_HEADER_BYTES};

/// Registration service over the traced PostgreSQL stores
pub type DaemonService =
    RegistrationService<TracedStore<PgCredentialsStore>, TracedStore<PgContentStore>>;

/// Daemon configuration, read from a TOML file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP listener binds to
    pub listen: SocketAddr,
    /// Credentials database (`sdusers_db`)
    pub credentials_url: String,
    /// Content database (`sd_db`)
    pub content_url: String,
    /// Pool size, per database
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long to wait for a pooled connection
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
    /// Log file; stderr when absent
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Config {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, LifecycleError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LifecycleError::ReadConfig(path.to_path_buf(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| LifecycleError::ParseConfig(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), LifecycleError> {
        if self.max_connections == 0 {
            return Err(LifecycleError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.core.request_timeout.is_zero() {
            return Err(LifecycleError::InvalidConfig(
                "core.request_timeout must be non-zero".to_string(),
            ));
        }
        if self.http.read_timeout.is_zero() {
            return Err(LifecycleError::InvalidConfig(
                "http.read_timeout must be non-zero".to_string(),
            ));
        }
        if self.http.max_header_bytes < MIN_HEADER_BYTES {
            return Err(LifecycleError::InvalidConfig(format!(
                "http.max_header_bytes must be at least {MIN_HEADER_BYTES}"
            )));
        }
        if self.http.connection_limit == 0 {
            return Err(LifecycleError::InvalidConfig(
                "http.connection_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_connections: self.max_connections,
            acquire_timeout: self.acquire_timeout,
        }
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to read config {0}: {1}")]
    ReadConfig(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config {0}: {1}")]
    ParseConfig(PathBuf, #[source] toml::de::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid log path: {0}")]
    InvalidLogPath(PathBuf),

    #[error("failed to connect {store} store: {source}")]
    Connect {
        store: StoreKind,
        #[source]
        source: StoreError,
    },

    #[error("failed to load TLS certificate {0}: {1}")]
    Tls(PathBuf, #[source] std::io::Error),

    #[error("failed to bind {0}: {1}")]
    BindFailed(SocketAddr, #[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Install the global subscriber; keep the guard alive until exit
pub fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let (non_blocking, guard) = match &config.log_path {
        Some(log_path) => {
            let dir = log_path
                .parent()
                .ok_or_else(|| LifecycleError::InvalidLogPath(log_path.clone()))?;
            let file_name = log_path
                .file_name()
                .ok_or_else(|| LifecycleError::InvalidLogPath(log_path.clone()))?;
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name))
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}

/// Wire the core components around a pair of stores
///
/// The shutdown controller, escalation path and both connection handles are
/// shared by every clone of the returned service.
pub fn build_service<C, D>(credentials: C, content: D, core: &CoreConfig) -> RegistrationService<C, D>
where
    C: Store,
    C::Tx: CredentialsTransaction,
    D: Store,
    D::Tx: ContentTransaction,
{
    let shutdown = ShutdownController::new(core.drain_timeout);
    let escalation = FatalEscalation::new(shutdown);
    let saga = RegistrationSaga::new(
        StoreHandle::new(StoreKind::Credentials, credentials),
        StoreHandle::new(StoreKind::Content, content),
        escalation,
    );
    RegistrationService::new(saga, core.clone())
}

/// Daemon state during operation
pub struct DaemonState {
    pub config: Config,
    pub listener: TcpListener,
    /// Set when serving HTTPS
    pub tls: Option<RustlsConfig>,
    pub service: DaemonService,
    pub pools: Pools,
}

impl DaemonState {
    pub fn shutdown_controller(&self) -> &ShutdownController {
        self.service.shutdown()
    }
}

/// Connection pools owned by the daemon, closed last
pub struct Pools {
    credentials: PgCredentialsStore,
    content: PgContentStore,
}

impl Pools {
    pub async fn close(self) {
        info!("Closing database pools...");
        self.credentials.close().await;
        self.content.close().await;
        info!("Daemon shutdown complete");
    }
}

/// Start the daemon
pub async fn startup(config: &Config) -> Result<DaemonState, LifecycleError> {
    // 1. Load the TLS identity before touching the databases
    let tls = match &config.http.tls {
        Some(tls) => Some(
            tls.load()
                .await
                .map_err(|e| LifecycleError::Tls(tls.cert_path.clone(), e))?,
        ),
        None => None,
    };

    // 2. Connect both stores (fail fast, don't accept requests without them)
    let credentials = PgCredentialsStore::connect(&config.credentials_url, config.pool_options())
        .await
        .map_err(|source| LifecycleError::Connect {
            store: StoreKind::Credentials,
            source,
        })?;
    let content = match PgContentStore::connect(&config.content_url, config.pool_options()).await
    {
        Ok(content) => content,
        Err(source) => {
            credentials.close().await;
            return Err(LifecycleError::Connect {
                store: StoreKind::Content,
                source,
            });
        }
    };

    // 3. Wrap stores with tracing and build the service
    let service = build_service(
        TracedStore::new(StoreKind::Credentials, credentials.clone()),
        TracedStore::new(StoreKind::Content, content.clone()),
        &config.core,
    );

    // 4. Bind (LAST - only after all validation passes)
    let listener = match TcpListener::bind(config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            credentials.close().await;
            content.close().await;
            return Err(LifecycleError::BindFailed(config.listen, e));
        }
    };

    info!(
        listen = %config.listen,
        tls = tls.is_some(),
        max_connections = config.max_connections,
        connection_limit = config.http.connection_limit,
        "Daemon started"
    );

    Ok(DaemonState {
        config: config.clone(),
        listener,
        tls,
        service,
        pools: Pools {
            credentials,
            content,
        },
    })
}

/// How the daemon stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
    /// Requested shutdown, or never started draining
    Clean,
    /// Drained after a fatal store or listener error
    Fatal,
}

impl StopStatus {
    pub fn of(shutdown: &ShutdownController) -> Self {
        match shutdown.drain_cause() {
            Some(cause) if cause.is_fatal() => StopStatus::Fatal,
            _ => StopStatus::Clean,
        }
    }

    pub fn exit_code(self) -> ExitCode {
        match self {
            StopStatus::Clean => ExitCode::SUCCESS,
            StopStatus::Fatal => ExitCode::FAILURE,
        }
    }
}

/// Tell the service manager the daemon is serving
///
/// A no-op outside systemd (no `NOTIFY_SOCKET`).
pub fn notify_ready() {
    if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        tracing::warn!(error = %e, "failed to notify service manager of readiness");
    }
}

/// Tell the service manager the daemon is stopping
pub fn notify_stopping() {
    if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Stopping]) {
        tracing::warn!(error = %e, "failed to notify service manager of shutdown");
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
