//! HTTP client.
//!
//! # Data Flow
//! ```text
//! request(req)
//!     → cached connection, or: TCP → [CONNECT tunnel] → [TLS] → hyper handshake
//!     → open a stream on the connection model
//!     → write stage (bridge): request target and headers
//!     → send on the connection (driver runs on the I/O executor)
//!     → read stage (bridge): assemble the buffered response and trailers
//!     → failures classified once, connection discarded when unusable
//! ```

use std::sync::Arc;

use bytes::Bytes;
use http::uri::Scheme;
use http::{Request, Response, Version};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::{http1, http2};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::request::{absolute_form, ensure_host, origin_form};
use super::response::Trailers;
use super::HttpResponse;
use crate::config::{ClientConfig, Protocol};
use crate::execution::{
    resolve, ExecutionStrategy, Executor, IoExecutor, IoSpawner, OffloadBridge, Stage,
};
use crate::failure::{classify, ClassifiedError, ErrorKind, RawFailure};
use crate::proxy;
use crate::transport::{tls, Connection, ConnectionState, StreamId};

enum Sender {
    Http1(tokio::sync::Mutex<http1::SendRequest<Full<Bytes>>>),
    Http2(http2::SendRequest<Full<Bytes>>),
}

/// An established connection and its stream model.
struct ClientConnection {
    model: Connection,
    sender: Sender,
}

impl ClientConnection {
    /// Exhausted stream ids are not checked here: the next `open_stream`
    /// fails with a retryable error and the caller moves on.
    fn is_usable(&self) -> bool {
        if self.model.state() != ConnectionState::Established {
            return false;
        }
        match &self.sender {
            Sender::Http1(sender) => sender.try_lock().map_or(true, |s| !s.is_closed()),
            Sender::Http2(sender) => !sender.is_closed(),
        }
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<Response<hyper::body::Incoming>, hyper::Error> {
        match &self.sender {
            Sender::Http1(sender) => {
                let mut sender = sender.lock().await;
                sender.ready().await?;
                sender.send_request(request).await
            }
            Sender::Http2(sender) => {
                let mut sender = sender.clone();
                sender.ready().await?;
                sender.send_request(request).await
            }
        }
    }
}

struct ClientInner {
    config: ClientConfig,
    io: Arc<IoExecutor>,
    worker: Arc<dyn Executor>,
    tls: Option<Arc<rustls::ClientConfig>>,
    cached: tokio::sync::Mutex<Option<Arc<ClientConnection>>>,
}

/// HTTP/1.1 or HTTP/2 client for one target authority.
///
/// Cloning is cheap; clones share the cached connection.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("address", &self.inner.config.address)
            .field("protocol", &self.inner.config.protocol)
            .field("tls", &self.inner.tls.is_some())
            .field("proxy", &self.inner.config.proxy.as_ref().map(|p| &p.address))
            .finish()
    }
}

impl HttpClient {
    pub fn new(
        config: ClientConfig,
        io: Arc<IoExecutor>,
        worker: Arc<dyn Executor>,
    ) -> Result<Self, tls::TlsError> {
        let tls = match &config.tls {
            Some(tls_config) => Some(tls::load_client_config(
                tls_config,
                &[config.protocol.alpn()],
            )?),
            None => None,
        };
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                io,
                worker,
                tls,
                cached: tokio::sync::Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Send `request` to the configured target.
    ///
    /// Only the path and query of the request URI are used; scheme and
    /// authority come from the configuration.
    pub async fn request(&self, request: Request<Bytes>) -> Result<HttpResponse, ClassifiedError> {
        self.send(request, None).await
    }

    /// Like [`request`](HttpClient::request), with a per-request strategy
    /// that wins over the client's configured one.
    pub async fn send(
        &self,
        request: Request<Bytes>,
        strategy: Option<&ExecutionStrategy>,
    ) -> Result<HttpResponse, ClassifiedError> {
        let strategy = resolve(strategy, &self.inner.config.strategy);
        let timeout = self.inner.config.request_timeout();
        match tokio::time::timeout(timeout, self.request_inner(request, strategy)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifiedError::generic(format!(
                "request to {} timed out after {timeout:?}",
                self.inner.config.address
            ))),
        }
    }

    async fn request_inner(
        &self,
        request: Request<Bytes>,
        strategy: ExecutionStrategy,
    ) -> Result<HttpResponse, ClassifiedError> {
        let (conn, stream_id) = self.open_stream().await?;
        let guard = StreamGuard::new(&conn, stream_id);

        let bridge = OffloadBridge::new(strategy, Arc::clone(&self.inner.worker));
        let result = self.exchange(&conn, &bridge, stream_id, request).await;
        guard.disarm();
        match &result {
            Ok(_) => conn.model.close_stream(stream_id),
            Err(err) => {
                conn.model.reset_stream(stream_id);
                if discards_connection(err) {
                    self.discard(&conn).await;
                }
            }
        }
        conn.model.prune();
        result
    }

    /// Open a stream on the cached connection, or on a fresh one when a
    /// concurrent request closed the cached one under us.
    async fn open_stream(&self) -> Result<(Arc<ClientConnection>, StreamId), ClassifiedError> {
        let mut conn = self.connection().await?;
        let mut fresh = false;
        loop {
            match conn.model.open_stream() {
                Ok(id) => return Ok((conn, id)),
                Err(err) => {
                    let closed_locally = err.kind() == ErrorKind::Generic
                        && conn.model.state() == ConnectionState::Closed;
                    self.discard(&conn).await;
                    if fresh || !closed_locally {
                        return Err(err);
                    }
                    conn = self.connection().await?;
                    fresh = true;
                }
            }
        }
    }

    async fn exchange(
        &self,
        conn: &ClientConnection,
        bridge: &OffloadBridge,
        stream_id: StreamId,
        request: Request<Bytes>,
    ) -> Result<HttpResponse, ClassifiedError> {
        let config = &self.inner.config;
        let authority = proxy::authority(config.host(), config.port());
        let scheme = if self.inner.tls.is_some() {
            Scheme::HTTPS
        } else {
            Scheme::HTTP
        };
        let protocol = config.protocol;
        let plain_proxy = config.proxy.is_some() && !tunnels(config);

        let request = bridge
            .run(Stage::Write, move || async move {
                prepare(request, protocol, scheme, &authority, plain_proxy)
            })
            .await??;

        tracing::trace!(stream_id = %stream_id, uri = %request.uri(), "Sending request");
        let response = conn
            .send(request)
            .await
            .map_err(|e| classify(RawFailure::Hyper(e)))?;

        let (parts, body) = response.into_parts();
        let collected = body
            .collect()
            .await
            .map_err(|e| classify(RawFailure::Hyper(e)))?;

        bridge
            .run(Stage::Read, move || async move {
                let trailers = collected.trailers().cloned();
                let mut response = Response::from_parts(parts, collected.to_bytes());
                if let Some(trailers) = trailers {
                    response.extensions_mut().insert(Trailers(trailers));
                }
                response
            })
            .await
    }

    /// The cached connection if still usable, otherwise a fresh one.
    async fn connection(&self) -> Result<Arc<ClientConnection>, ClassifiedError> {
        let mut cached = self.inner.cached.lock().await;
        if let Some(conn) = cached.as_ref() {
            if conn.is_usable() {
                return Ok(Arc::clone(conn));
            }
            conn.model.close();
        }

        let conn = Arc::new(self.connect().await?);
        *cached = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Forget `conn` so the next request opens a new connection.
    async fn discard(&self, conn: &Arc<ClientConnection>) {
        conn.model.close();
        let mut cached = self.inner.cached.lock().await;
        if cached.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn)) {
            *cached = None;
            tracing::debug!(connection_id = %conn.model.id(), "Connection discarded");
        }
    }

    /// Establish a connection on the I/O executor.
    async fn connect(&self) -> Result<ClientConnection, ClassifiedError> {
        let config = self.inner.config.clone();
        let tls = self.inner.tls.clone();
        let spawner = self.inner.io.spawner();
        let timeout = config.connect_timeout();

        let establish = async move {
            let model = match config.max_streams_per_connection {
                Some(streams) => Connection::with_stream_limit(streams),
                None => Connection::new(),
            };
            let connected = tokio::time::timeout(timeout, dial(&config, tls, spawner)).await;
            let sender = match connected {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ClassifiedError::generic(format!(
                        "connecting to {} timed out after {timeout:?}",
                        config.address
                    )))
                }
            };
            model.establish();
            tracing::debug!(
                connection_id = %model.id(),
                address = %config.address,
                protocol = ?config.protocol,
                "Connection established"
            );
            Ok(ClientConnection { model, sender })
        };

        self.inner
            .io
            .spawn(establish)
            .await
            .map_err(|e| classify(RawFailure::Other {
                source: Box::new(e),
                retryable: false,
            }))?
    }
}

/// Resets a stream whose request future was dropped mid-exchange, on
/// timeout or when the caller gives up.
struct StreamGuard {
    conn: Option<Arc<ClientConnection>>,
    stream_id: StreamId,
}

impl StreamGuard {
    fn new(conn: &Arc<ClientConnection>, stream_id: StreamId) -> Self {
        Self {
            conn: Some(Arc::clone(conn)),
            stream_id,
        }
    }

    /// The exchange finished; the caller settles the stream itself.
    fn disarm(mut self) {
        self.conn = None;
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.model.reset_stream(self.stream_id);
            conn.model.prune();
            tracing::debug!(
                connection_id = %conn.model.id(),
                stream_id = %self.stream_id,
                "Abandoned stream reset"
            );
        }
    }
}

/// Whether requests to the target go through a CONNECT tunnel.
fn tunnels(config: &ClientConfig) -> bool {
    config.proxy.is_some() && (config.tls.is_some() || config.protocol == Protocol::Http2)
}

/// Failures after which the connection cannot carry more streams.
fn discards_connection(err: &ClassifiedError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::StreamIdsExhausted | ErrorKind::ConnectionClosedByPeer
    ) || err
        .downcast_ref::<hyper::Error>()
        .is_some_and(|e| e.is_closed() || e.is_canceled() || e.is_incomplete_message())
}

fn prepare(
    request: Request<Bytes>,
    protocol: Protocol,
    scheme: Scheme,
    authority: &str,
    plain_proxy: bool,
) -> Result<Request<Full<Bytes>>, ClassifiedError> {
    let (mut parts, body) = request.into_parts();
    let invalid = |e: http::Error| {
        classify(RawFailure::Other {
            source: Box::new(e),
            retryable: false,
        })
    };

    match protocol {
        Protocol::Http1 => {
            parts.version = Version::HTTP_11;
            parts.uri = if plain_proxy {
                absolute_form(&parts.uri, scheme, authority).map_err(invalid)?
            } else {
                origin_form(&parts.uri)
            };
            ensure_host(&mut parts.headers, authority);
        }
        Protocol::Http2 => {
            parts.version = Version::HTTP_2;
            parts.uri = absolute_form(&parts.uri, scheme, authority).map_err(invalid)?;
            parts.headers.remove(http::header::HOST);
        }
    }
    Ok(Request::from_parts(parts, Full::new(body)))
}

/// TCP, optional tunnel, optional TLS, then the protocol handshake.
async fn dial(
    config: &ClientConfig,
    tls: Option<Arc<rustls::ClientConfig>>,
    spawner: IoSpawner,
) -> Result<Sender, ClassifiedError> {
    let dial_address = config
        .proxy
        .as_ref()
        .map_or(config.address.as_str(), |p| p.address.as_str());
    let tcp = TcpStream::connect(dial_address)
        .await
        .map_err(|e| classify(RawFailure::Io(e)))?;
    let _ = tcp.set_nodelay(true);

    let tcp = match &config.proxy {
        Some(proxy_config) if tunnels(config) => {
            proxy::establish(
                tcp,
                config.host(),
                config.port(),
                proxy_config.authorization.as_deref(),
            )
            .await?
        }
        _ => tcp,
    };

    match tls {
        Some(tls) => {
            let name = config
                .tls
                .as_ref()
                .and_then(|t| t.server_name.clone())
                .unwrap_or_else(|| config.host().to_owned());
            let server_name = tls::server_name(&name).map_err(|e| {
                classify(RawFailure::Other {
                    source: Box::new(e),
                    retryable: false,
                })
            })?;
            let stream = TlsConnector::from(tls)
                .connect(server_name, tcp)
                .await
                .map_err(|e| classify(RawFailure::Io(e)))?;
            handshake(stream, config.protocol, spawner).await
        }
        None => handshake(tcp, config.protocol, spawner).await,
    }
}

async fn handshake<IO>(io: IO, protocol: Protocol, spawner: IoSpawner) -> Result<Sender, ClassifiedError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(io);
    match protocol {
        Protocol::Http1 => {
            let (sender, conn) = http1::handshake(io)
                .await
                .map_err(|e| classify(RawFailure::Hyper(e)))?;
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    tracing::debug!(error = %e, "HTTP/1.1 connection closed with error");
                }
            });
            Ok(Sender::Http1(tokio::sync::Mutex::new(sender)))
        }
        Protocol::Http2 => {
            let (sender, conn) = http2::handshake(spawner, io)
                .await
                .map_err(|e| classify(RawFailure::Hyper(e)))?;
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    tracing::debug!(error = %e, "HTTP/2 connection closed with error");
                }
            });
            Ok(Sender::Http2(sender))
        }
    }
}
