//! CONNECT tunnel negotiation.
//!
//! ```text
//! NotStarted ──CONNECT──► ConnectSent ──2xx──► Established
//!                             └──non-2xx / malformed──► Failed
//! ```
//!
//! Exactly one CONNECT is sent per tunnel; there is no internal retry.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::response::{parse_head, ProxyResponseError, MAX_HEAD_BYTES};
use crate::failure::{classify, ClassifiedError};
use crate::observability::metrics;

/// Tunnel negotiation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    NotStarted,
    ConnectSent,
    Established,
    Failed,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelState::NotStarted => "not_started",
            TunnelState::ConnectSent => "connect_sent",
            TunnelState::Established => "established",
            TunnelState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A transport to a forward proxy, about to be turned into a tunnel.
pub struct ProxyTunnel<IO> {
    io: IO,
    state: TunnelState,
    authorization: Option<String>,
}

impl<IO> ProxyTunnel<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: IO) -> Self {
        Self {
            io,
            state: TunnelState::NotStarted,
            authorization: None,
        }
    }

    /// Send `Proxy-Authorization: value` with the CONNECT.
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Ask the proxy for a tunnel to `host:port`.
    ///
    /// On success the transport is untouched beyond the CONNECT exchange and
    /// can be handed to the secure handshake via [`into_inner`].
    ///
    /// [`into_inner`]: ProxyTunnel::into_inner
    pub async fn negotiate(&mut self, host: &str, port: u16) -> Result<(), ClassifiedError> {
        if self.state != TunnelState::NotStarted {
            return Err(ClassifiedError::generic(format!(
                "CONNECT already attempted on this transport (state {})",
                self.state
            )));
        }

        let target = authority(host, port);
        let result = self.exchange(&target).await;
        match &result {
            Ok(()) => {
                self.state = TunnelState::Established;
                metrics::record_proxy_connect("established");
                tracing::debug!(target = %target, "Proxy tunnel established");
            }
            Err(err) => {
                self.state = TunnelState::Failed;
                tracing::warn!(target = %target, error = %err, "Proxy tunnel failed");
            }
        }
        result
    }

    async fn exchange(&mut self, target: &str) -> Result<(), ClassifiedError> {
        let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
        if let Some(auth) = &self.authorization {
            request.push_str("Proxy-Authorization: ");
            request.push_str(auth);
            request.push_str("\r\n");
        }
        request.push_str("\r\n");

        self.state = TunnelState::ConnectSent;
        if let Err(e) = self.write_request(request.as_bytes()).await {
            metrics::record_proxy_connect("io_error");
            return Err(classify(e));
        }

        let malformed = |status, detail: String| {
            metrics::record_proxy_connect("malformed");
            classify(ProxyResponseError::Malformed {
                target: target.to_owned(),
                status,
                detail,
            })
        };

        let mut buf = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];
        let head = loop {
            let n = match self.io.read(&mut chunk).await {
                Ok(n) => n,
                Err(e) => {
                    metrics::record_proxy_connect("io_error");
                    return Err(classify(e));
                }
            };
            if n == 0 {
                return Err(malformed(
                    None,
                    "proxy closed the connection before completing the response head".into(),
                ));
            }
            buf.extend_from_slice(&chunk[..n]);

            match parse_head(&buf) {
                Ok(Some(head)) => break head,
                Ok(None) if buf.len() >= MAX_HEAD_BYTES => {
                    return Err(malformed(
                        None,
                        format!("response head exceeds {MAX_HEAD_BYTES} bytes"),
                    ));
                }
                Ok(None) => continue,
                Err(detail) => return Err(malformed(None, detail)),
            }
        };

        if !head.status.is_success() {
            metrics::record_proxy_connect("rejected");
            return Err(classify(ProxyResponseError::Rejected {
                target: target.to_owned(),
                status: head.status,
            }));
        }
        if head.len < buf.len() {
            return Err(malformed(
                Some(head.status),
                format!(
                    "{} unexpected bytes after the response head",
                    buf.len() - head.len
                ),
            ));
        }
        Ok(())
    }

    async fn write_request(&mut self, request: &[u8]) -> std::io::Result<()> {
        self.io.write_all(request).await?;
        self.io.flush().await
    }

    /// The raw transport.
    pub fn into_inner(self) -> IO {
        self.io
    }
}

impl<IO> fmt::Debug for ProxyTunnel<IO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyTunnel")
            .field("state", &self.state)
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Negotiate a tunnel over `io` and hand the transport back.
pub async fn establish<IO>(
    io: IO,
    host: &str,
    port: u16,
    authorization: Option<&str>,
) -> Result<IO, ClassifiedError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let mut tunnel = ProxyTunnel::new(io);
    if let Some(auth) = authorization {
        tunnel = tunnel.with_authorization(auth);
    }
    tunnel.negotiate(host, port).await?;
    Ok(tunnel.into_inner())
}

/// `host:port`, bracketing IPv6 literals.
pub fn authority(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::ErrorKind;
    use http::StatusCode;
    use tokio::io::{duplex, DuplexStream};

    /// Fake proxy: read the CONNECT head, answer with `reply`.
    fn proxy(reply: &'static [u8]) -> (DuplexStream, tokio::task::JoinHandle<String>) {
        fake_proxy(reply, false)
    }

    /// Like [`proxy`], but hangs up right after writing `reply`.
    fn hanging_up_proxy(reply: &'static [u8]) -> (DuplexStream, tokio::task::JoinHandle<String>) {
        fake_proxy(reply, true)
    }

    fn fake_proxy(
        reply: &'static [u8],
        hang_up: bool,
    ) -> (DuplexStream, tokio::task::JoinHandle<String>) {
        let (client, mut server) = duplex(16 * 1024);
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut buf = [0u8; 256];
            while !seen.ends_with(b"\r\n\r\n") {
                let n = server.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            server.write_all(reply).await.unwrap();
            if !hang_up {
                // Keep the pipe open until the client is done.
                let _ = server.read(&mut buf).await;
            }
            String::from_utf8(seen).unwrap()
        });
        (client, handle)
    }

    #[tokio::test]
    async fn established_on_2xx() {
        let (io, server) = proxy(b"HTTP/1.1 200 Connection established\r\n\r\n");
        let mut tunnel = ProxyTunnel::new(io).with_authorization("Basic dTpw");
        tunnel.negotiate("example.com", 443).await.unwrap();
        assert_eq!(tunnel.state(), TunnelState::Established);
        drop(tunnel.into_inner());

        let request = server.await.unwrap();
        assert!(request.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
        assert!(request.contains("Host: example.com:443\r\n"));
        assert!(request.contains("Proxy-Authorization: Basic dTpw\r\n"));
    }

    #[tokio::test]
    async fn rejected_on_non_2xx() {
        let (io, _server) = proxy(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n");
        let mut tunnel = ProxyTunnel::new(io);
        let err = tunnel.negotiate("example.com", 443).await.unwrap_err();

        assert_eq!(tunnel.state(), TunnelState::Failed);
        assert_eq!(err.kind(), ErrorKind::ProxyRejected);
        assert!(!err.is_retryable());
        assert_eq!(err.proxy_status(), Some(StatusCode::PROXY_AUTHENTICATION_REQUIRED));
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let (io, _server) = proxy(b"hello there\r\n\r\n");
        let mut tunnel = ProxyTunnel::new(io);
        let err = tunnel.negotiate("example.com", 443).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProxyMalformedResponse);
        assert_eq!(err.proxy_status(), None);
    }

    #[tokio::test]
    async fn bytes_after_head_are_malformed() {
        let (io, _server) = proxy(b"HTTP/1.1 200 OK\r\n\r\nearly");
        let mut tunnel = ProxyTunnel::new(io);
        let err = tunnel.negotiate("example.com", 443).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProxyMalformedResponse);
        assert_eq!(err.proxy_status(), Some(StatusCode::OK));
    }

    #[tokio::test]
    async fn eof_before_head_is_malformed() {
        let (io, server) = hanging_up_proxy(b"HTTP/1.1 200 OK\r\n");
        let mut tunnel = ProxyTunnel::new(io);
        let err = tunnel.negotiate("example.com", 443).await.unwrap_err();

        assert_eq!(tunnel.state(), TunnelState::Failed);
        assert_eq!(err.kind(), ErrorKind::ProxyMalformedResponse);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("before completing the response head"), "{err}");

        let request = server.await.unwrap();
        assert!(request.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn second_negotiation_is_refused() {
        let (io, _server) = proxy(b"HTTP/1.1 200 OK\r\n\r\n");
        let mut tunnel = ProxyTunnel::new(io);
        tunnel.negotiate("example.com", 443).await.unwrap();
        assert!(tunnel.negotiate("example.com", 443).await.is_err());
    }

    #[test]
    fn ipv6_authority_is_bracketed() {
        assert_eq!(authority("::1", 8443), "[::1]:8443");
        assert_eq!(authority("localhost", 80), "localhost:80");
    }
}
