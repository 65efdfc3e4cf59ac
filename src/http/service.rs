//! The application-facing service trait.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

use async_trait::async_trait;

use super::{HttpRequest, HttpResponse};
use crate::execution::{CancelSignal, ExecutionStrategy};
use crate::transport::ConnectionId;

/// Per-request facts handed to a service.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub(crate) connection_id: ConnectionId,
    pub(crate) peer_addr: SocketAddr,
    pub(crate) strategy: ExecutionStrategy,
    pub(crate) executor: String,
    pub(crate) cancel: CancelSignal,
}

impl ServiceContext {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Strategy in effect for this request.
    pub fn strategy(&self) -> &ExecutionStrategy {
        &self.strategy
    }

    /// Name of the executor offloaded stages run on.
    pub fn executor(&self) -> &str {
        &self.executor
    }

    /// Raised when the request is cancelled. Long handlers may poll it.
    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }
}

/// An HTTP application.
///
/// `handle` runs where the request's strategy puts the handle stage: on the
/// I/O thread for offload-none, on a worker thread otherwise.
#[async_trait]
pub trait HttpService: Send + Sync + 'static {
    async fn handle(&self, ctx: &ServiceContext, request: HttpRequest) -> HttpResponse;

    /// Strategy override for this service; wins over the server default.
    fn execution_strategy(&self) -> Option<ExecutionStrategy> {
        None
    }
}

/// [`HttpService`] built from a closure. See [`service_fn`].
pub struct ServiceFn<F> {
    f: F,
    strategy: Option<ExecutionStrategy>,
}

impl<F> ServiceFn<F> {
    /// Override the server's default strategy for this service.
    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

impl<F> fmt::Debug for ServiceFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceFn")
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// Adapt `f` into an [`HttpService`].
pub fn service_fn<F, Fut>(f: F) -> ServiceFn<F>
where
    F: Fn(ServiceContext, HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    ServiceFn { f, strategy: None }
}

#[async_trait]
impl<F, Fut> HttpService for ServiceFn<F>
where
    F: Fn(ServiceContext, HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    async fn handle(&self, ctx: &ServiceContext, request: HttpRequest) -> HttpResponse {
        (self.f)(ctx.clone(), request).await
    }

    fn execution_strategy(&self) -> Option<ExecutionStrategy> {
        self.strategy
    }
}
