//! Unary RPC client over an HTTP/2 [`HttpClient`].

use bytes::Bytes;
use http::header::{CONTENT_TYPE, TE};
use http::{HeaderValue, Method, Request, StatusCode};

use super::codec::{decode_frame, encode_frame, ContentCodec, GRPC_ACCEPT_ENCODING, GRPC_ENCODING};
use super::error::RpcError;
use super::metadata::RpcClientMetadata;
use super::status::{Code, RpcStatus};
use super::{is_grpc_content_type, GRPC_CONTENT_TYPE};
use crate::config::Protocol;
use crate::http::{HttpClient, HttpResponse, Trailers};

const GRPC_TIMEOUT: &str = "grpc-timeout";

/// Client for unary calls against one target.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: HttpClient,
}

impl RpcClient {
    /// Wrap `http`, which should speak HTTP/2; trailers are not delivered
    /// over HTTP/1.1 here.
    pub fn new(http: HttpClient) -> Self {
        if http.config().protocol != Protocol::Http2 {
            tracing::warn!(
                address = %http.config().address,
                "RPC client over HTTP/1.1; trailers-only responses will be required"
            );
        }
        Self { http }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Call `path` (`/package.Service/Method`) with one request message and
    /// return the one response message.
    pub async fn unary(
        &self,
        path: &str,
        metadata: &RpcClientMetadata,
        message: impl Into<Bytes>,
    ) -> Result<Bytes, RpcError> {
        let request = build_request(path, metadata, &message.into())?;
        let call = self.http.send(request, metadata.strategy());

        let response = match metadata.timeout() {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| RpcError::Timeout(timeout))??,
            None => call.await?,
        };

        let result = read_response(response);
        if let Err(err) = &result {
            tracing::debug!(path, error = %err, "RPC failed");
        }
        result
    }
}

fn build_request(
    path: &str,
    metadata: &RpcClientMetadata,
    message: &[u8],
) -> Result<Request<Bytes>, RpcError> {
    let codec = metadata.request_encoding();
    let frame = encode_frame(codec, message)?;

    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(CONTENT_TYPE, GRPC_CONTENT_TYPE)
        .header(TE, "trailers")
        .header(GRPC_ACCEPT_ENCODING, "gzip,identity");
    if !codec.is_identity() {
        builder = builder.header(GRPC_ENCODING, codec.name());
    }
    if let Some(timeout) = metadata.timeout() {
        builder = builder.header(GRPC_TIMEOUT, format!("{}m", timeout.as_millis().max(1)));
    }
    builder
        .body(frame)
        .map_err(|e| RpcError::Protocol(format!("invalid request for {path}: {e}")))
}

fn read_response(response: HttpResponse) -> Result<Bytes, RpcError> {
    if response.status() != StatusCode::OK {
        return Err(RpcError::Protocol(format!(
            "unexpected HTTP status {}",
            response.status()
        )));
    }

    // Trailers-only responses carry the status in the headers.
    let status = RpcStatus::from_headers(response.headers())
        .or_else(|| {
            response
                .extensions()
                .get::<Trailers>()
                .and_then(|t| RpcStatus::from_headers(&t.0))
        })
        .ok_or_else(|| RpcError::Protocol("response carries no grpc-status".into()))?;
    if status.code != Code::Ok {
        return Err(RpcError::Status(status));
    }

    let content_type = response.headers().get(CONTENT_TYPE);
    if !content_type.is_some_and(is_grpc_content_type) {
        return Err(RpcError::Protocol(format!(
            "unexpected content-type {:?}",
            content_type.map(HeaderValue::to_str)
        )));
    }

    let codec = response_codec(response.headers().get(GRPC_ENCODING))?;
    decode_frame(codec, response.body())
}

fn response_codec(value: Option<&HeaderValue>) -> Result<ContentCodec, RpcError> {
    let Some(value) = value else {
        return Ok(ContentCodec::Identity);
    };
    value
        .to_str()
        .ok()
        .and_then(ContentCodec::from_name)
        .ok_or_else(|| RpcError::Protocol(format!("unsupported grpc-encoding {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Response};
    use std::time::Duration;

    fn grpc_response(body: Bytes, trailers: Option<HeaderMap>) -> HttpResponse {
        let mut response = Response::new(body);
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
        if let Some(trailers) = trailers {
            response.extensions_mut().insert(Trailers(trailers));
        }
        response
    }

    #[test]
    fn request_carries_grpc_headers() {
        let metadata = RpcClientMetadata::new()
            .with_request_encoding(ContentCodec::Gzip)
            .with_timeout(Duration::from_millis(1500));
        let request = build_request("/echo.Echo/Say", &metadata, b"hi").unwrap();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.headers()[CONTENT_TYPE], GRPC_CONTENT_TYPE);
        assert_eq!(request.headers()[TE], "trailers");
        assert_eq!(request.headers()[GRPC_ENCODING], "gzip");
        assert_eq!(request.headers()[GRPC_TIMEOUT], "1500m");
        assert_eq!(request.body()[0], 1);
    }

    #[test]
    fn status_in_trailers() {
        let mut trailers = HeaderMap::new();
        RpcStatus::ok().write_to(&mut trailers);
        let body = encode_frame(ContentCodec::Identity, b"pong").unwrap();

        let message = read_response(grpc_response(body, Some(trailers))).unwrap();
        assert_eq!(message, "pong");
    }

    #[test]
    fn trailers_only_error() {
        let mut response = grpc_response(Bytes::new(), None);
        RpcStatus::new(Code::NotFound, "missing").write_to(response.headers_mut());

        let err = read_response(response).unwrap_err();
        assert_eq!(err.code(), Some(Code::NotFound));
        assert!(!err.is_retryable());
    }

    #[test]
    fn missing_status_is_protocol_error() {
        let body = encode_frame(ContentCodec::Identity, b"pong").unwrap();
        let err = read_response(grpc_response(body, None)).unwrap_err();
        assert!(matches!(err, RpcError::Protocol(_)));
    }
}
