//! Correlation-echo service served by the `conduit` binary.
//!
//! Every request must carry `X-Request-ID`. The id is put into the request
//! context at the edge and read back by the downstream step, which echoes it.
//! A request that starts with a request id already in its context is
//! answered with 500.

use bytes::Bytes;
use http::StatusCode;

use crate::context::{self, REQUEST_ID};
use crate::http::{
    request_id, service_fn, set_request_id, text, HttpRequest, HttpResponse, HttpService,
    ServiceContext,
};

pub fn correlation_service() -> impl HttpService {
    service_fn(|ctx: ServiceContext, request: HttpRequest| async move {
        correlate(&ctx, request).await
    })
}

async fn correlate(ctx: &ServiceContext, request: HttpRequest) -> HttpResponse {
    if let Some(stale) = context::get(&REQUEST_ID) {
        tracing::error!(
            connection_id = %ctx.connection_id(),
            stale = %stale,
            "Request entered with inherited context"
        );
        return text(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("inherited request id {stale}"),
        );
    }

    let Some(id) = request_id(request.headers()) else {
        return text(StatusCode::BAD_REQUEST, "missing X-Request-ID");
    };
    if let Err(e) = context::put(&REQUEST_ID, id) {
        return text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    downstream(request.into_body()).await
}

/// Sees only what the context carries.
async fn downstream(_body: Bytes) -> HttpResponse {
    let Some(id) = context::get(&REQUEST_ID) else {
        return text(StatusCode::INTERNAL_SERVER_ERROR, "request id lost");
    };
    let mut response = text(StatusCode::OK, format!("request-id: {id}"));
    set_request_id(response.headers_mut(), &id);
    response
}
