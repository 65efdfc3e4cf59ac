//! HTTPS through a forward proxy.

use bytes::Bytes;
use http::{Request, StatusCode};

use conduit::config::{ClientConfig, ClientTlsConfig, ForwardProxyConfig};
use conduit::execution::ExecutionStrategy;
use conduit::http::{service_fn, text, HttpRequest, ServiceContext};
use conduit::{ErrorKind, HttpClient};

mod common;

use common::{MockProxy, TestCert};

fn host_echo() -> impl conduit::http::HttpService {
    service_fn(|_ctx: ServiceContext, request: HttpRequest| async move {
        let host = request
            .headers()
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("<none>")
            .to_owned();
        text(StatusCode::OK, format!("host: {host}"))
    })
}

fn secure_client_config(
    server: std::net::SocketAddr,
    proxy: &MockProxy,
    cert: &TestCert,
) -> ClientConfig {
    ClientConfig {
        tls: Some(ClientTlsConfig {
            ca_path: None,
            ca_der: vec![cert.cert_der.to_vec()],
            server_name: Some("localhost".into()),
        }),
        proxy: Some(ForwardProxyConfig {
            address: proxy.addr.to_string(),
            authorization: None,
        }),
        request_timeout_secs: 5,
        ..ClientConfig::for_address(server.to_string())
    }
}

#[tokio::test]
async fn https_request_tunnels_through_proxy() {
    let executors = common::executors();
    let cert = TestCert::generate();
    let server = common::start_server(
        &executors,
        common::server_config(ExecutionStrategy::offload_all()),
        host_echo(),
        Some(cert.server_config()),
    )
    .await;
    let proxy = MockProxy::start().await;

    let client = HttpClient::new(
        secure_client_config(server.local_addr(), &proxy, &cert),
        executors.io.clone(),
        executors.worker.clone(),
    )
    .unwrap();

    let response = client
        .request(Request::get("/").body(Bytes::new()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.body(),
        &Bytes::from(format!("host: {}", server.local_addr()))
    );
    assert_eq!(proxy.connect_count(), 1);

    // The tunnel is reused for the next request.
    let again = client
        .request(Request::get("/").body(Bytes::new()).unwrap())
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(proxy.connect_count(), 1);

    server.close().await;
}

#[tokio::test]
async fn rejected_connect_never_reaches_server() {
    let executors = common::executors();
    let cert = TestCert::generate();
    let server = common::start_server(
        &executors,
        common::server_config(ExecutionStrategy::offload_all()),
        host_echo(),
        Some(cert.server_config()),
    )
    .await;
    let proxy = MockProxy::rejecting(407).await;

    let client = HttpClient::new(
        secure_client_config(server.local_addr(), &proxy, &cert),
        executors.io.clone(),
        executors.worker.clone(),
    )
    .unwrap();

    let err = client
        .request(Request::get("/").body(Bytes::new()).unwrap())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProxyRejected);
    assert_eq!(err.proxy_status(), Some(StatusCode::PROXY_AUTHENTICATION_REQUIRED));
    assert!(!err.is_retryable());
    assert_eq!(proxy.connect_count(), 1);
    assert_eq!(server.connections_accepted(), 0);

    server.close().await;
}
