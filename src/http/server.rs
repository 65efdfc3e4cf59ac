//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Bind the listener on the I/O executor
//! - Serve HTTP/1.1 and HTTP/2 (ALPN or prior knowledge) per connection
//! - Wire up middleware (tracing, timeout, body limit)
//! - Run each request read → handle → write through the offload bridge
//! - Graceful close via the shutdown coordinator

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Extension, State};
use axum::response::Response;
use axum::Router;
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::response::{into_body, pipeline_failure, text};
use super::service::{HttpService, ServiceContext};
use crate::config::ServerConfig;
use crate::context::{self, ContextSnapshot};
use crate::execution::{resolve, Executor, IoExecutor, IoSpawner, OffloadBridge, Stage};
use crate::lifecycle::{Shutdown, ShutdownListener};
use crate::observability::metrics;
use crate::transport::{ConnectionId, ConnectionTracker, Listener, ListenerError};

/// Error type for server startup.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("I/O executor failed to run the listener: {0}")]
    Executor(#[from] tokio::task::JoinError),
}

/// Per-connection facts, attached to every request of the connection.
#[derive(Debug, Clone)]
struct ConnectionInfo {
    id: ConnectionId,
    peer_addr: SocketAddr,
}

/// Shared state of the request pipeline.
struct Dispatch {
    service: Arc<dyn HttpService>,
    worker: Arc<dyn Executor>,
    config: ServerConfig,
}

/// HTTP server bound to an I/O executor and a worker executor.
pub struct HttpServer {
    config: ServerConfig,
    io: Arc<IoExecutor>,
    worker: Arc<dyn Executor>,
    service: Arc<dyn HttpService>,
    tls: Option<Arc<rustls::ServerConfig>>,
}

impl HttpServer {
    pub fn new(
        config: ServerConfig,
        io: Arc<IoExecutor>,
        worker: Arc<dyn Executor>,
        service: impl HttpService,
    ) -> Self {
        Self {
            config,
            io,
            worker,
            service: Arc::new(service),
            tls: None,
        }
    }

    /// Terminate TLS on accepted connections.
    pub fn with_tls(mut self, tls: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(&self) -> Router {
        let dispatch = Arc::new(Dispatch {
            service: Arc::clone(&self.service),
            worker: Arc::clone(&self.worker),
            config: self.config.clone(),
        });
        Router::new()
            .fallback(handle_request)
            .with_state(dispatch)
            .layer(RequestBodyLimitLayer::new(self.config.max_body_bytes))
            .layer(TimeoutLayer::new(self.config.request_timeout()))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and start accepting on the I/O executor.
    pub async fn bind(self) -> Result<ServerContext, ServerError> {
        let address = self.config.bind_address.clone();
        let max_connections = self.config.max_connections;
        let listener = self
            .io
            .spawn(async move { Listener::bind(&address, max_connections).await })
            .await??;
        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            address: self.config.bind_address.clone(),
            source,
        })?;

        let shutdown = Shutdown::new();
        let tracker = ConnectionTracker::new();
        let accept = AcceptLoop {
            listener,
            router: self.build_router(),
            tls: self.tls.clone().map(TlsAcceptor::from),
            spawner: self.io.spawner(),
            http2_only: self.config.http2_only,
            tracker: tracker.clone(),
            shutdown: shutdown.subscribe(),
        };
        let accept_task = self.io.spawn(accept.run());

        tracing::info!(
            address = %local_addr,
            tls = self.tls.is_some(),
            strategy = %self.config.strategy,
            "HTTP server started"
        );

        Ok(ServerContext {
            local_addr,
            tracker,
            shutdown,
            accept_task: Some(accept_task),
            shutdown_timeout: self.config.shutdown_timeout(),
        })
    }
}

struct AcceptLoop {
    listener: Listener,
    router: Router,
    tls: Option<TlsAcceptor>,
    spawner: IoSpawner,
    http2_only: bool,
    tracker: ConnectionTracker,
    shutdown: ShutdownListener,
}

impl AcceptLoop {
    async fn run(mut self) {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.recv() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Closed) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            let info = ConnectionInfo {
                id: ConnectionId::new(),
                peer_addr,
            };
            let guard = self.tracker.track(info.id);
            let tls = self.tls.clone();
            let router = self.router.clone();
            let spawner = self.spawner.clone();
            let http2_only = self.http2_only;
            let shutdown = self.shutdown.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let _guard = guard;
                match tls {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(stream) => {
                            serve_connection(stream, info, router, spawner, http2_only, shutdown)
                                .await
                        }
                        Err(e) => {
                            tracing::debug!(connection_id = %info.id, error = %e, "TLS handshake failed");
                        }
                    },
                    None => {
                        serve_connection(stream, info, router, spawner, http2_only, shutdown).await
                    }
                }
            });
        }
        tracing::debug!("Accept loop stopped");
    }
}

async fn serve_connection<IO>(
    io: IO,
    info: ConnectionInfo,
    router: Router,
    spawner: IoSpawner,
    http2_only: bool,
    mut shutdown: ShutdownListener,
) where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let connection_id = info.id;
    let service = TowerToHyperService::new(ServiceExt::<Request<Incoming>>::map_request(
        router,
        move |mut request: Request<Incoming>| {
            request.extensions_mut().insert(info.clone());
            request
        },
    ));

    let mut builder = auto::Builder::new(spawner);
    if http2_only {
        builder = builder.http2_only();
    }
    let conn = builder.serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        tracing::debug!(connection_id = %connection_id, error = %e, "Connection ended with error");
    }
}

/// Fallback handler: every request goes through the bridge.
async fn handle_request(
    State(dispatch): State<Arc<Dispatch>>,
    Extension(info): Extension<ConnectionInfo>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();

    let strategy = resolve(
        dispatch.service.execution_strategy().as_ref(),
        &dispatch.config.strategy,
    );
    let bridge = OffloadBridge::new(strategy, Arc::clone(&dispatch.worker));
    let ctx = ServiceContext {
        connection_id: info.id,
        peer_addr: info.peer_addr,
        strategy,
        executor: bridge.executor_name().to_owned(),
        cancel: bridge.cancel_signal().clone(),
    };

    // Each request starts from an empty context and leaves nothing behind.
    let response = context::restore(ContextSnapshot::empty(), async move {
        let (parts, body) = request.into_parts();
        let bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let status = if is_length_limit(&e) {
                    StatusCode::PAYLOAD_TOO_LARGE
                } else {
                    StatusCode::BAD_REQUEST
                };
                return into_body(text(status, e.to_string()));
            }
        };

        let pipeline = async {
            let request = bridge
                .run(Stage::Read, move || async move {
                    Request::from_parts(parts, bytes)
                })
                .await?;

            let service = Arc::clone(&dispatch.service);
            let response = bridge
                .run(Stage::Handle, move || async move {
                    service.handle(&ctx, request).await
                })
                .await?;

            bridge
                .run(Stage::Write, move || async move { into_body(response) })
                .await
        };

        match pipeline.await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    connection_id = %info.id,
                    kind = %err.kind(),
                    error = %err,
                    "Request pipeline failed"
                );
                into_body(pipeline_failure(&err))
            }
        }
    })
    .await;

    metrics::record_request(method.as_str(), response.status().as_u16(), start);
    response
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut next: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = next {
        if current.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        next = current.source();
    }
    false
}

/// A running server.
///
/// Dropping it stops accepting without waiting; [`close`] also drains.
///
/// [`close`]: ServerContext::close
#[derive(Debug)]
pub struct ServerContext {
    local_addr: SocketAddr,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
    accept_task: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl ServerContext {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections accepted since the server started.
    pub fn connections_accepted(&self) -> u64 {
        self.tracker.accepted_count()
    }

    /// Connections currently open.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Stop accepting, let open connections finish, then return.
    ///
    /// Connections still open after the shutdown timeout are left to the
    /// I/O executor's own shutdown.
    pub async fn close(mut self) {
        self.shutdown.trigger();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        if !self.tracker.wait_idle(self.shutdown_timeout).await {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Connections still open after shutdown timeout"
            );
        }
        tracing::info!(address = %self.local_addr, "HTTP server stopped");
    }
}

impl Drop for ServerContext {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}
