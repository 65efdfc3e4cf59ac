//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use conduit::config::{ExecutorConfig, IoConfig, ServerConfig};
use conduit::execution::{ExecutionStrategy, Executor, IoExecutor, WorkerExecutor};
use conduit::http::{HttpService, ServerContext};
use conduit::transport::tls;
use conduit::HttpServer;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const IO_PREFIX: &str = "test-io";
pub const WORKER_PREFIX: &str = "test-worker";

/// Executors sized for tests.
pub struct Executors {
    pub io: Arc<IoExecutor>,
    pub worker: Arc<dyn Executor>,
}

pub fn executors() -> Executors {
    let io = IoExecutor::new(&IoConfig {
        threads: 2,
        thread_name_prefix: IO_PREFIX.into(),
    })
    .unwrap();
    let worker = WorkerExecutor::new(&ExecutorConfig {
        threads: 2,
        queue_capacity: 64,
        thread_name_prefix: WORKER_PREFIX.into(),
    })
    .unwrap();
    Executors {
        io: Arc::new(io),
        worker: Arc::new(worker),
    }
}

/// reqwest client that ignores proxy environment variables.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

pub fn server_config(strategy: ExecutionStrategy) -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1:0".into(),
        strategy,
        request_timeout_secs: 5,
        shutdown_timeout_secs: 1,
        ..ServerConfig::default()
    }
}

/// Start `service` on an ephemeral port.
pub async fn start_server(
    executors: &Executors,
    config: ServerConfig,
    service: impl HttpService,
    tls: Option<Arc<rustls::ServerConfig>>,
) -> ServerContext {
    let mut server = HttpServer::new(
        config,
        Arc::clone(&executors.io),
        Arc::clone(&executors.worker),
        service,
    );
    if let Some(tls) = tls {
        server = server.with_tls(tls);
    }
    server.bind().await.unwrap()
}

/// Self-signed certificate for `localhost`.
pub struct TestCert {
    pub cert_der: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl TestCert {
    pub fn generate() -> Self {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        Self {
            cert_der: certified.cert.der().clone(),
            key_der: certified.key_pair.serialize_der(),
        }
    }

    pub fn server_config(&self) -> Arc<rustls::ServerConfig> {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()));
        tls::server_config(vec![self.cert_der.clone()], key, &[b"h2", b"http/1.1"]).unwrap()
    }
}

/// Forward proxy that answers CONNECT and relays bytes.
pub struct MockProxy {
    pub addr: SocketAddr,
    connects: Arc<AtomicUsize>,
}

impl MockProxy {
    /// Proxy that establishes every tunnel.
    pub async fn start() -> Self {
        Self::start_with(None).await
    }

    /// Proxy that answers every CONNECT with `status` and closes.
    pub async fn rejecting(status: u16) -> Self {
        Self::start_with(Some(status)).await
    }

    async fn start_with(reject: Option<u16>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = connects.clone();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let counter = counter.clone();
                tokio::spawn(async move {
                    let _ = relay(socket, counter, reject).await;
                });
            }
        });

        Self { addr, connects }
    }

    /// CONNECT requests received so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

async fn relay(
    mut client: TcpStream,
    connects: Arc<AtomicUsize>,
    reject: Option<u16>,
) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = client.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        head.extend_from_slice(&buf[..n]);
    }

    let text = String::from_utf8_lossy(&head);
    let mut parts = text.lines().next().unwrap_or_default().split_whitespace();
    let (Some("CONNECT"), Some(target)) = (parts.next(), parts.next()) else {
        client
            .write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n")
            .await?;
        return Ok(());
    };
    connects.fetch_add(1, Ordering::SeqCst);

    if let Some(status) = reject {
        let reply = format!(
            "HTTP/1.1 {status} Rejected\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
        client.write_all(reply.as_bytes()).await?;
        return client.shutdown().await;
    }

    let mut upstream = TcpStream::connect(target).await?;
    client
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;
    tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}
