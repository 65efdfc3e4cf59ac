//! Adapts a unary handler to an [`HttpService`].

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method, Response, StatusCode};

use super::codec::{decode_frame, encode_frame, ContentCodec, GRPC_ENCODING};
use super::status::{Code, RpcStatus};
use super::{is_grpc_content_type, GRPC_CONTENT_TYPE};
use crate::execution::ExecutionStrategy;
use crate::http::{text, HttpRequest, HttpResponse, HttpService, ServiceContext, Trailers};

/// A unary RPC handler served over HTTP. See [`unary_service`].
pub struct UnaryService<F> {
    handler: F,
    strategy: Option<ExecutionStrategy>,
}

impl<F> UnaryService<F> {
    /// Override the server's default strategy for this service.
    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

impl<F> fmt::Debug for UnaryService<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnaryService")
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// Serve `handler` for every RPC path.
///
/// The handler gets the decoded request message; its `Err` becomes a
/// trailers-only response carrying the status.
pub fn unary_service<F, Fut>(handler: F) -> UnaryService<F>
where
    F: Fn(ServiceContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, RpcStatus>> + Send + 'static,
{
    UnaryService {
        handler,
        strategy: None,
    }
}

#[async_trait]
impl<F, Fut> HttpService for UnaryService<F>
where
    F: Fn(ServiceContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, RpcStatus>> + Send + 'static,
{
    async fn handle(&self, ctx: &ServiceContext, request: HttpRequest) -> HttpResponse {
        let grpc = request
            .headers()
            .get(CONTENT_TYPE)
            .is_some_and(is_grpc_content_type);
        if !grpc {
            return text(StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected application/grpc");
        }
        if request.method() != Method::POST {
            return status_only(RpcStatus::new(Code::Unimplemented, "RPC requires POST"));
        }

        let codec = match request.headers().get(GRPC_ENCODING) {
            None => ContentCodec::Identity,
            Some(value) => match value.to_str().ok().and_then(ContentCodec::from_name) {
                Some(codec) => codec,
                None => {
                    return status_only(RpcStatus::new(
                        Code::Unimplemented,
                        format!("unsupported grpc-encoding {value:?}"),
                    ))
                }
            },
        };

        let message = match decode_frame(codec, request.body()) {
            Ok(message) => message,
            Err(err) => return status_only(RpcStatus::new(Code::Internal, err.to_string())),
        };

        let path = request.uri().path().to_owned();
        match (self.handler)(ctx.clone(), message).await {
            Ok(reply) => match encode_frame(ContentCodec::Identity, &reply) {
                Ok(frame) => {
                    let mut trailers = HeaderMap::new();
                    RpcStatus::ok().write_to(&mut trailers);
                    let mut response = grpc_response(frame);
                    response.extensions_mut().insert(Trailers(trailers));
                    response
                }
                Err(err) => status_only(RpcStatus::new(Code::Internal, err.to_string())),
            },
            Err(status) => {
                tracing::debug!(path = %path, status = %status, "RPC completed with error status");
                status_only(status)
            }
        }
    }

    fn execution_strategy(&self) -> Option<ExecutionStrategy> {
        self.strategy
    }
}

fn grpc_response(body: Bytes) -> HttpResponse {
    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
    response
}

/// Trailers-only response: the status travels in the header block.
fn status_only(status: RpcStatus) -> HttpResponse {
    let mut response = grpc_response(Bytes::new());
    status.write_to(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_has_no_body() {
        let response = status_only(RpcStatus::new(Code::Unavailable, "later"));
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.body().is_empty());
        assert_eq!(response.headers()["grpc-status"], "14");
        assert_eq!(response.headers()["grpc-message"], "later");
    }
}
