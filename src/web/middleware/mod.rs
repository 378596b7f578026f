//! Tower layers wrapping the HTTP service.
//!
//! All layers operate on `Request<Body>` / `Response<Body>` and never fail at
//! the service level: problems are turned into JSON error responses instead.
//! [`stack`] assembles the default pipeline used by
//! [`App::service`](crate::web::app::App::service).

use hyper::{Body, Request};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceBuilder};
use warp::reply::Response;

mod inspect;
mod real_ip;
mod recoverer;
mod request_id;
mod timeout;
mod trace;
mod version_header;

pub use inspect::{InspectRequest, InspectRequestLayer};
pub use real_ip::{RealIp, RealIpLayer, RealIpService, real_ip, with_real_ip};
pub use recoverer::{Recoverer, RecovererLayer};
pub use request_id::{RequestIdLayer, RequestIdService};
pub use timeout::{DEFAULT_TIMEOUT, Timeout, TimeoutLayer};
pub use trace::{TracingLayer, TracingService};
pub use version_header::{VERSION_HEADER, VersionHeader, VersionHeaderLayer};

/// The future returned by every middleware service.
pub type ResponseFuture = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

/// A type-erased HTTP service as produced by [`stack`].
pub type HttpService = BoxCloneSyncService<Request<Body>, Response, Infallible>;

/// Options for the default middleware pipeline.
#[derive(Clone, Debug)]
pub struct StackConfig {
    pub remote: Option<SocketAddr>,
    pub request_timeout: Duration,
    pub api_version: Option<String>,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            remote: None,
            request_timeout: DEFAULT_TIMEOUT,
            api_version: None,
        }
    }
}

/// Wraps `service` into the default pipeline.
///
/// From the outside in: real IP, request id, tracing span, request logging,
/// version header (if configured), panic recovery and finally the request
/// timeout.
pub fn stack<S>(service: S, config: StackConfig) -> HttpService
where
    S: Service<Request<Body>, Response = Response, Error = Infallible>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    let service = ServiceBuilder::new()
        .layer(RealIpLayer::new(config.remote))
        .layer(RequestIdLayer::default())
        .layer(TracingLayer)
        .layer(InspectRequestLayer)
        .layer(VersionHeaderLayer::new(config.api_version))
        .layer(RecovererLayer)
        .layer(TimeoutLayer::new(config.request_timeout))
        .service(service);

    BoxCloneSyncService::new(service)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tower::service_fn;

    /// A service answering every request with the given body.
    pub fn respond_with(
        body: &'static str,
    ) -> impl Service<Request<Body>, Response = Response, Error = Infallible, Future: Send + 'static>
    + Clone
    + Send
    + Sync
    + 'static {
        service_fn(move |_req: Request<Body>| async move { Ok::<_, Infallible>(Response::new(body.into())) })
    }

    pub async fn body_string(response: Response) -> String {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}
