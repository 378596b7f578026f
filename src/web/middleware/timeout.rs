use crate::web::middleware::ResponseFuture;
use crate::web::respond::DEFAULT_RESPONDER;
use anyhow::anyhow;
use hyper::{Body, Request};
use std::convert::Infallible;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};
use warp::http::StatusCode;
use warp::reply::Response;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Answers with a 504 if the wrapped service does not respond in time.
///
/// The handler is dropped once the deadline passes.
#[derive(Clone, Copy, Debug)]
pub struct TimeoutLayer {
    timeout: Duration,
}

impl TimeoutLayer {
    pub fn new(timeout: Duration) -> Self {
        TimeoutLayer { timeout }
    }
}

impl Default for TimeoutLayer {
    fn default() -> Self {
        TimeoutLayer::new(DEFAULT_TIMEOUT)
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = Timeout<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Timeout {
            inner,
            timeout: self.timeout,
        }
    }
}

#[derive(Clone)]
pub struct Timeout<S> {
    inner: S,
    timeout: Duration,
}

impl<S> Service<Request<Body>> for Timeout<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = ResponseFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let timeout = self.timeout;

        Box::pin(async move {
            match tokio::time::timeout(timeout, inner.call(req)).await {
                Ok(response) => response,
                Err(_) => {
                    tracing::warn!("request timed out after {:?}", timeout);
                    Ok(DEFAULT_RESPONDER.error(
                        StatusCode::GATEWAY_TIMEOUT,
                        &anyhow!("timed out after {:?}", timeout),
                    ))
                }
            }
        })
    }
}
