use crate::web::middleware::ResponseFuture;
use hyper::{Body, Request};
use std::convert::Infallible;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use warp::http::HeaderValue;
use warp::reply::Response;

pub const VERSION_HEADER: &str = "x-api-version";

/// Sets `X-API-Version` on every response. Without a version this is a no-op.
#[derive(Clone, Debug, Default)]
pub struct VersionHeaderLayer {
    version: Option<HeaderValue>,
}

impl VersionHeaderLayer {
    pub fn new(version: Option<String>) -> Self {
        let version = version.and_then(|version| match HeaderValue::from_str(&version) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring API version '{}' as it is no valid header value", version);
                None
            }
        });

        VersionHeaderLayer { version }
    }
}

impl<S> Layer<S> for VersionHeaderLayer {
    type Service = VersionHeader<S>;

    fn layer(&self, inner: S) -> Self::Service {
        VersionHeader {
            inner,
            version: self.version.clone(),
        }
    }
}

#[derive(Clone)]
pub struct VersionHeader<S> {
    inner: S,
    version: Option<HeaderValue>,
}

impl<S> Service<Request<Body>> for VersionHeader<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible>,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = ResponseFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let version = self.version.clone();
        let future = self.inner.call(req);

        Box::pin(async move {
            let mut response = future.await?;
            if let Some(version) = version {
                response.headers_mut().insert(VERSION_HEADER, version);
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::middleware::testing::respond_with;
    use tower::ServiceExt;

    #[tokio::test]
    async fn sets_configured_version() {
        let service = VersionHeaderLayer::new(Some("2.0.1".to_string())).layer(respond_with(""));

        let response = service
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.headers()[VERSION_HEADER], "2.0.1");
    }

    #[tokio::test]
    async fn leaves_responses_alone_without_version() {
        let service = VersionHeaderLayer::new(None).layer(respond_with(""));

        let response = service
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.headers().get(VERSION_HEADER).is_none());
    }
}
