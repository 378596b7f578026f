use hyper::{Body, Request};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use warp::Filter;
use warp::http::HeaderMap;

const X_REAL_IP: &str = "x-real-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// The client address as determined by [`RealIpLayer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RealIp(pub String);

/// Resolves the client address from `X-Real-IP`, then the first entry of
/// `X-Forwarded-For`, then the address of the connection itself.
///
/// Only trust these headers behind a reverse proxy which sets them.
pub fn real_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(ip) = header(X_REAL_IP) {
        return Some(ip.to_string());
    }
    if let Some(forwarded) = header(X_FORWARDED_FOR) {
        let first = forwarded.split(',').next().unwrap_or(forwarded).trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }

    remote.map(|addr| addr.ip().to_string())
}

/// Stores the [`RealIp`] of each request in its extensions.
///
/// The layer is created per connection so that it knows the remote address.
#[derive(Clone, Copy, Debug, Default)]
pub struct RealIpLayer {
    remote: Option<SocketAddr>,
}

impl RealIpLayer {
    pub fn new(remote: Option<SocketAddr>) -> Self {
        RealIpLayer { remote }
    }
}

impl<S> Layer<S> for RealIpLayer {
    type Service = RealIpService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RealIpService {
            inner,
            remote: self.remote,
        }
    }
}

#[derive(Clone)]
pub struct RealIpService<S> {
    inner: S,
    remote: Option<SocketAddr>,
}

impl<S> Service<Request<Body>> for RealIpService<S>
where
    S: Service<Request<Body>, Error = Infallible>,
{
    type Response = S::Response;
    type Error = Infallible;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        if let Some(ip) = real_ip(req.headers(), self.remote) {
            req.extensions_mut().insert(RealIp(ip));
        }
        self.inner.call(req)
    }
}

/// Extracts the [`RealIp`] determined by the middleware, if any.
pub fn with_real_ip() -> impl Filter<Extract = (Option<RealIp>,), Error = Infallible> + Clone {
    warp::ext::optional::<RealIp>()
}
