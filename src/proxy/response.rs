//! The forward proxy's reply to CONNECT.

use http::StatusCode;

/// Largest reply head accepted from a proxy.
pub const MAX_HEAD_BYTES: usize = 8 * 1024;

const MAX_HEADERS: usize = 64;

/// Why a CONNECT through the forward proxy failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyResponseError {
    /// The proxy answered with a non-2xx status.
    #[error("proxy rejected CONNECT to {target} with status {status}")]
    Rejected { target: String, status: StatusCode },
    /// The proxy's reply could not be understood.
    #[error("malformed CONNECT response from proxy for {target}: {detail}")]
    Malformed {
        target: String,
        status: Option<StatusCode>,
        detail: String,
    },
}

impl ProxyResponseError {
    /// Status the proxy answered with, when one was parsed.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ProxyResponseError::Rejected { status, .. } => Some(*status),
            ProxyResponseError::Malformed { status, .. } => *status,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            ProxyResponseError::Rejected { target, .. } => target,
            ProxyResponseError::Malformed { target, .. } => target,
        }
    }
}

/// A complete reply head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    pub status: StatusCode,
    /// Bytes the head occupies, including the blank line.
    pub len: usize,
}

/// Parse a reply head. `Ok(None)` means more bytes are needed.
pub(crate) fn parse_head(buf: &[u8]) -> Result<Option<ResponseHead>, String> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(buf) {
        Ok(httparse::Status::Complete(len)) => {
            let code = response.code.ok_or("missing status code")?;
            let status = StatusCode::from_u16(code).map_err(|e| e.to_string())?;
            Ok(Some(ResponseHead { status, len }))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_established() {
        let head = parse_head(b"HTTP/1.1 200 Connection established\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.len, 39);
    }

    #[test]
    fn partial_head_needs_more() {
        assert_eq!(parse_head(b"HTTP/1.1 200 OK\r\nVia: x\r\n"), Ok(None));
    }

    #[test]
    fn garbage_is_error() {
        assert!(parse_head(b"SSH-2.0-OpenSSH\r\n\r\n").is_err());
    }

    #[test]
    fn status_accessor() {
        let err = ProxyResponseError::Malformed {
            target: "h:1".into(),
            status: None,
            detail: "x".into(),
        };
        assert_eq!(err.status(), None);
        assert_eq!(err.target(), "h:1");
    }
}
