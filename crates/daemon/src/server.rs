// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP listener and request handling.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_server::accept::{Accept, DefaultAcceptor};
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use axum_server::{Handle, Server};
use hyper_util::rt::TokioTimer;
use sd_core::{
    ContentTransaction, CredentialsTransaction, RegistrationService, RejectionKind,
    ShutdownController, Store,
};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower::ServiceBuilder;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::RequestBodyTimeoutLayer;
use tracing::{debug, info, warn};

pub const CONFIRMED_MESSAGE: &str =
    "Registration confirmed. Now you can proceed to the Login page";

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// hyper refuses read buffers smaller than this
pub const MIN_HEADER_BYTES: usize = 8192;

/// Listener settings, the `[http]` config section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    /// Time allowed to receive a request's headers, and then its body
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Largest request head accepted
    pub max_header_bytes: usize,
    /// Open connections served at once; further connections wait for a slot
    pub connection_limit: usize,
    /// Serve HTTPS when set
    pub tls: Option<TlsConfig>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            max_header_bytes: 1 << 20,
            connection_limit: 500,
            tls: None,
        }
    }
}

/// PEM certificate chain and private key
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TlsConfig {
    pub async fn load(&self) -> io::Result<RustlsConfig> {
        // Already installed on a second load
        let _ = rustls::crypto::ring::default_provider().install_default();
        RustlsConfig::from_pem_file(&self.cert_path, &self.key_path).await
    }
}

/// Query parameters of the confirmation link
#[derive(Debug, Default, Deserialize)]
pub struct ConfirmParams {
    pub nickname: Option<String>,
    pub confirmationkey: Option<String>,
}

/// Build the router serving the confirmation endpoint
///
/// Every response, errors included, is marked uncacheable.
pub fn router<C, D>(service: RegistrationService<C, D>) -> Router
where
    C: Store,
    C::Tx: CredentialsTransaction,
    D: Store,
    D::Tx: ContentTransaction,
{
    Router::new()
        .route("/registrationconfirmation", get(confirm::<C, D>))
        .with_state(service)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static(NO_CACHE),
        ))
}

async fn confirm<C, D>(
    State(service): State<RegistrationService<C, D>>,
    Query(params): Query<ConfirmParams>,
) -> Response
where
    C: Store,
    C::Tx: CredentialsTransaction,
    D: Store,
    D::Tx: ContentTransaction,
{
    debug!(nickname = ?params.nickname, "confirmation request");
    let result = service
        .confirm(params.nickname.as_deref(), params.confirmationkey.as_deref())
        .await;
    match result {
        Ok(_) => (StatusCode::OK, CONFIRMED_MESSAGE).into_response(),
        Err(rejection) => (status_for(rejection.kind), rejection.message).into_response(),
    }
}

pub fn status_for(kind: RejectionKind) -> StatusCode {
    match kind {
        RejectionKind::BadRequest => StatusCode::BAD_REQUEST,
        RejectionKind::Conflict => StatusCode::CONFLICT,
        RejectionKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        RejectionKind::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type Served = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

/// Serve until the process has drained
///
/// Draining stops the listener and gives open connections up to the drain
/// timeout to finish; connections still open after that are closed. The
/// future resolves no later than the process reaching `Stopped`, whatever
/// the clients do.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    http: &HttpConfig,
    tls: Option<RustlsConfig>,
    shutdown: &ShutdownController,
) -> io::Result<()> {
    let handle = Handle::new();
    {
        let handle = handle.clone();
        let drain_timeout = shutdown.drain_timeout();
        shutdown.on_draining(move || {
            info!("Draining, listener stopped accepting");
            handle.graceful_shutdown(Some(drain_timeout));
        });
    }

    let app = app.layer(ServiceBuilder::new().layer(RequestBodyTimeoutLayer::new(http.read_timeout)));
    let make_service = app.into_make_service();
    let limit = ConnectionLimit::new(DefaultAcceptor::new(), http.connection_limit);
    let server = axum_server::from_tcp(listener.into_std()?);

    let served: Served = match tls {
        Some(config) => {
            let acceptor = RustlsAcceptor::new(config).acceptor(limit);
            let server = configure(server.acceptor(acceptor), http, handle.clone());
            Box::pin(server.serve(make_service))
        }
        None => {
            let server = configure(server.acceptor(limit), http, handle.clone());
            Box::pin(server.serve(make_service))
        }
    };

    tokio::select! {
        served = served => served,
        () = shutdown.wait_stopped() => {
            warn!(
                connections = handle.connection_count(),
                "stopped with connections still open, closing them"
            );
            handle.shutdown();
            Ok(())
        }
    }
}

fn configure<A>(mut server: Server<A>, http: &HttpConfig, handle: Handle) -> Server<A> {
    server
        .http_builder()
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(http.read_timeout)
        .max_buf_size(http.max_header_bytes);
    server.handle(handle)
}

/// Acceptor capping the number of open connections
///
/// A connection holds its slot until it closes; connections beyond the cap
/// wait for a slot before anything is read from them.
#[derive(Debug, Clone)]
pub struct ConnectionLimit<A> {
    inner: A,
    slots: Arc<Semaphore>,
}

impl<A> ConnectionLimit<A> {
    pub fn new(inner: A, limit: usize) -> Self {
        Self {
            inner,
            slots: Arc::new(Semaphore::new(limit)),
        }
    }
}

impl<A, I, S> Accept<I, S> for ConnectionLimit<A>
where
    A: Accept<I, S> + Clone + Send + Sync + 'static,
    A::Future: Send,
    A::Stream: Send,
    A::Service: Send,
    I: Send + 'static,
    S: Send + 'static,
{
    type Stream = Limited<A::Stream>;
    type Service = A::Service;
    type Future = Pin<Box<dyn Future<Output = io::Result<(Self::Stream, Self::Service)>> + Send>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let inner = self.inner.clone();
        let slots = Arc::clone(&self.slots);
        Box::pin(async move {
            let permit = slots
                .acquire_owned()
                .await
                .map_err(|_| io::Error::other("connection limiter closed"))?;
            let (stream, service) = inner.accept(stream, service).await?;
            Ok((
                Limited {
                    stream,
                    _permit: permit,
                },
                service,
            ))
        })
    }
}

/// Connection stream holding a [`ConnectionLimit`] slot
#[derive(Debug)]
pub struct Limited<T> {
    stream: T,
    _permit: OwnedSemaphorePermit,
}

impl<T: AsyncRead + Unpin> AsyncRead for Limited<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Limited<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
