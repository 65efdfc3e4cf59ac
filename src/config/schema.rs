//! Configuration schema definitions.
//!
//! Every section is defaulted, so an empty file is a valid configuration.
//! Executors and strategies are plain values here; nothing is registered
//! globally.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::execution::ExecutionStrategy;

/// Root configuration for the runtime.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// I/O thread pool.
    pub io: IoConfig,

    /// Offload worker pool.
    pub executor: ExecutorConfig,

    /// HTTP server settings.
    pub server: ServerConfig,

    /// HTTP client settings.
    pub client: ClientConfig,

    /// Caller-side retry settings.
    pub retries: RetryConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// I/O thread pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IoConfig {
    pub threads: usize,
    pub thread_name_prefix: String,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            threads: 2,
            thread_name_prefix: "conduit-io".to_string(),
        }
    }
}

/// Offload worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub threads: usize,

    /// Computations that may be queued or running at once before new
    /// submissions are rejected.
    pub queue_capacity: usize,

    pub thread_name_prefix: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            queue_capacity: 1024,
            thread_name_prefix: "conduit-worker".to_string(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080"). Port 0 picks a free port.
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Default strategy for requests on this server.
    pub strategy: ExecutionStrategy,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Serve HTTP/2 with prior knowledge only.
    pub http2_only: bool,

    /// Total time allowed per request in seconds.
    pub request_timeout_secs: u64,

    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,

    /// Time granted to in-flight connections on close, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            max_connections: 10_000,
            strategy: ExecutionStrategy::default(),
            tls: None,
            http2_only: false,
            request_timeout_secs: 30,
            max_body_bytes: 1024 * 1024,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// TLS configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Wire protocol spoken by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http1,
    Http2,
}

impl Protocol {
    /// ALPN identifier.
    pub fn alpn(&self) -> &'static [u8] {
        match self {
            Protocol::Http1 => b"http/1.1",
            Protocol::Http2 => b"h2",
        }
    }
}

/// HTTP client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Target authority ("host:port").
    pub address: String,

    pub protocol: Protocol,

    /// Secure the connection with TLS.
    pub tls: Option<ClientTlsConfig>,

    /// Route through a forward proxy.
    pub proxy: Option<ForwardProxyConfig>,

    /// Strategy for response processing on this client.
    pub strategy: ExecutionStrategy,

    pub connect_timeout_ms: u64,

    pub request_timeout_secs: u64,

    /// Streams a single connection may open before it is exhausted.
    /// `None` means the protocol maximum.
    pub max_streams_per_connection: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            protocol: Protocol::Http1,
            tls: None,
            proxy: None,
            strategy: ExecutionStrategy::default(),
            connect_timeout_ms: 5_000,
            request_timeout_secs: 30,
            max_streams_per_connection: None,
        }
    }
}

impl ClientConfig {
    /// Client for `address` with every other setting defaulted.
    pub fn for_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Host part of the target authority.
    pub fn host(&self) -> &str {
        split_authority(&self.address).0
    }

    /// Port of the target authority; 443 with TLS and 80 otherwise when absent.
    pub fn port(&self) -> u16 {
        split_authority(&self.address)
            .1
            .unwrap_or(if self.tls.is_some() { 443 } else { 80 })
    }
}

fn split_authority(authority: &str) -> (&str, Option<u16>) {
    if let Some(rest) = authority.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (authority, None),
        },
        _ => (authority, None),
    }
}

/// TLS settings for the client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientTlsConfig {
    /// PEM file with trusted roots.
    pub ca_path: Option<String>,

    /// DER-encoded trusted roots supplied in code.
    #[serde(skip)]
    pub ca_der: Vec<Vec<u8>>,

    /// Name to verify; defaults to the target host.
    pub server_name: Option<String>,
}

/// Forward proxy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwardProxyConfig {
    /// Proxy authority ("host:port").
    pub address: String,

    /// Value of the `Proxy-Authorization` header, if any.
    #[serde(default)]
    pub authorization: Option<String>,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Share of requests that may be retries (retry budget).
    /// e.g., 0.1 for 10% budget.
    pub budget_ratio: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            budget_ratio: 0.1,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or an `EnvFilter`
    /// directive string.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
