//! Where the handle stage runs.

use std::sync::Arc;

use http::StatusCode;

use conduit::config::ExecutorConfig;
use conduit::execution::{current_thread_name, on_io_thread, ExecutionStrategy, WorkerExecutor};
use conduit::http::{service_fn, text, HttpRequest, HttpResponse, HttpService, ServiceContext};

mod common;

use common::{IO_PREFIX, WORKER_PREFIX};

async fn thread_report(_ctx: ServiceContext, _request: HttpRequest) -> HttpResponse {
    let name = current_thread_name().unwrap_or_default();
    text(StatusCode::OK, format!("{} {name}", on_io_thread()))
}

async fn report(
    executors: &common::Executors,
    strategy: ExecutionStrategy,
    service: impl HttpService,
) -> (bool, String) {
    let server =
        common::start_server(executors, common::server_config(strategy), service, None).await;
    let body = common::http_client()
        .get(format!("http://{}/", server.local_addr()))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    server.close().await;

    let (io, name) = body.split_once(' ').unwrap();
    (io == "true", name.to_owned())
}

#[tokio::test]
async fn offload_none_handles_on_io_thread() {
    let executors = common::executors();
    let (io, name) = report(
        &executors,
        ExecutionStrategy::offload_none(),
        service_fn(thread_report),
    )
    .await;
    assert!(io, "handled on {name}");
    assert!(name.starts_with(IO_PREFIX), "handled on {name}");
}

#[tokio::test]
async fn offload_all_handles_on_worker_thread() {
    let executors = common::executors();
    let (io, name) = report(
        &executors,
        ExecutionStrategy::offload_all(),
        service_fn(thread_report),
    )
    .await;
    assert!(!io, "handled on {name}");
    assert!(name.starts_with(WORKER_PREFIX), "handled on {name}");
}

#[tokio::test]
async fn service_strategy_wins_over_server_default() {
    let executors = common::executors();
    let service = service_fn(thread_report).with_strategy(ExecutionStrategy::offload_none());
    let (io, name) = report(&executors, ExecutionStrategy::offload_all(), service).await;
    assert!(io, "handled on {name}");
}

#[tokio::test]
async fn saturated_executor_answers_503() {
    let mut executors = common::executors();
    executors.worker = Arc::new(
        WorkerExecutor::new(&ExecutorConfig {
            threads: 1,
            queue_capacity: 0,
            thread_name_prefix: "full-worker".into(),
        })
        .unwrap(),
    );
    let server = common::start_server(
        &executors,
        common::server_config(ExecutionStrategy::offload_all()),
        service_fn(thread_report),
        None,
    )
    .await;

    let response = common::http_client()
        .get(format!("http://{}/", server.local_addr()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);

    server.close().await;
}
