use crate::web::REQUEST_ID_HEADER;
use crate::web::middleware::ResponseFuture;
use crate::web::request_id::{self, DEFAULT_GENERATOR, Generator};
use hyper::{Body, Request};
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use warp::http::HeaderValue;
use warp::reply::Response;

/// Assigns every request an id.
///
/// The id is taken from `X-Request-Id` if present and generated otherwise. It
/// is stored in the request extensions, made available via
/// [`request_id::current`] while the request is handled and echoed on the
/// response.
#[derive(Clone)]
pub struct RequestIdLayer {
    generator: Arc<Generator>,
}

impl RequestIdLayer {
    pub fn new(generator: Arc<Generator>) -> Self {
        RequestIdLayer { generator }
    }
}

impl Default for RequestIdLayer {
    fn default() -> Self {
        RequestIdLayer::new(DEFAULT_GENERATOR.clone())
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService {
            inner,
            generator: self.generator.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
    generator: Arc<Generator>,
}

impl<S> Service<Request<Body>> for RequestIdService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let id = self.generator.next(req.headers());
        req.extensions_mut().insert(id.clone());

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let mut response =
                request_id::scope(id.clone(), async move { inner.call(req).await }).await?;
            if let Ok(value) = HeaderValue::from_str(id.as_str()) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            Ok(response)
        })
    }
}
