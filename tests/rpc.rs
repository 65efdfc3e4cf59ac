//! Unary RPC over HTTP/2 with prior knowledge.

use std::time::Duration;

use bytes::Bytes;

use conduit::config::{ClientConfig, Protocol};
use conduit::execution::ExecutionStrategy;
use conduit::http::ServiceContext;
use conduit::rpc::{
    unary_service, Code, ContentCodec, RpcClient, RpcClientMetadata, RpcError, RpcStatus,
};
use conduit::HttpClient;

mod common;

async fn shout(_ctx: ServiceContext, message: Bytes) -> Result<Bytes, RpcStatus> {
    match std::str::from_utf8(&message) {
        Ok("") => Err(RpcStatus::new(Code::InvalidArgument, "nothing to shout")),
        Ok("slow") => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(Bytes::from_static(b"SLOW"))
        }
        Ok(text) => Ok(Bytes::from(text.to_uppercase())),
        Err(_) => Err(RpcStatus::new(Code::InvalidArgument, "not utf-8")),
    }
}

async fn setup(executors: &common::Executors) -> (conduit::http::ServerContext, RpcClient) {
    let server = common::start_server(
        executors,
        common::server_config(ExecutionStrategy::offload_all()),
        unary_service(shout),
        None,
    )
    .await;
    let http = HttpClient::new(
        ClientConfig {
            protocol: Protocol::Http2,
            request_timeout_secs: 5,
            ..ClientConfig::for_address(server.local_addr().to_string())
        },
        executors.io.clone(),
        executors.worker.clone(),
    )
    .unwrap();
    (server, RpcClient::new(http))
}

#[tokio::test]
async fn unary_round_trip() {
    let executors = common::executors();
    let (server, client) = setup(&executors).await;

    let reply = client
        .unary("/demo.Shout/Say", &RpcClientMetadata::new(), "hello")
        .await
        .unwrap();
    assert_eq!(reply, "HELLO");

    let gzip = RpcClientMetadata::new().with_request_encoding(ContentCodec::Gzip);
    let reply = client.unary("/demo.Shout/Say", &gzip, "zipped").await.unwrap();
    assert_eq!(reply, "ZIPPED");

    server.close().await;
}

#[tokio::test]
async fn error_status_reaches_caller() {
    let executors = common::executors();
    let (server, client) = setup(&executors).await;

    let err = client
        .unary("/demo.Shout/Say", &RpcClientMetadata::new(), "")
        .await
        .unwrap_err();
    match &err {
        RpcError::Status(status) => {
            assert_eq!(status.code, Code::InvalidArgument);
            assert_eq!(status.message, "nothing to shout");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_retryable());

    server.close().await;
}

#[tokio::test]
async fn deadline_and_per_call_strategy() {
    let executors = common::executors();
    let (server, client) = setup(&executors).await;

    let metadata = RpcClientMetadata::new().with_timeout(Duration::from_millis(200));
    let err = client
        .unary("/demo.Shout/Say", &metadata, "slow")
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout(_)), "{err:?}");

    // Response processing inline; the call still completes.
    let inline = RpcClientMetadata::new().with_strategy(ExecutionStrategy::offload_none());
    let reply = client.unary("/demo.Shout/Say", &inline, "inline").await.unwrap();
    assert_eq!(reply, "INLINE");

    server.close().await;
}
