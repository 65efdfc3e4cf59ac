//! Response helpers.
//!
//! # Responsibilities
//! - Carry trailers alongside a buffered response
//! - Turn buffered responses into streaming bodies for the wire
//! - Map bridge failures to status codes

use std::convert::Infallible;

use axum::body::Body;
use bytes::Bytes;
use futures_util::stream;
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use http_body_util::StreamBody;
use hyper::body::Frame;

use super::HttpResponse;
use crate::failure::{ClassifiedError, ErrorKind};

/// Trailer fields of a message, stored as a response extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trailers(pub HeaderMap);

impl Trailers {
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.0.get(name)
    }
}

/// Buffered response with a `text/plain` body.
pub fn text(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Response to send when the request pipeline itself failed.
pub(crate) fn pipeline_failure(err: &ClassifiedError) -> HttpResponse {
    let status = match err.kind() {
        ErrorKind::ExecutorRejected => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    text(status, err.to_string())
}

/// Convert a buffered response into a wire body, trailers included.
pub(crate) fn into_body(response: HttpResponse) -> Response<Body> {
    let (mut parts, data) = response.into_parts();
    let trailers = parts.extensions.remove::<Trailers>();

    let Some(Trailers(trailers)) = trailers else {
        return Response::from_parts(parts, Body::from(data));
    };

    let mut frames = Vec::with_capacity(2);
    if !data.is_empty() {
        frames.push(Ok::<_, Infallible>(Frame::data(data)));
    }
    frames.push(Ok(Frame::trailers(trailers)));
    Response::from_parts(parts, Body::new(StreamBody::new(stream::iter(frames))))
}
