use crate::tools::watch::Watch;
use crate::web::middleware::ResponseFuture;
use hyper::body::HttpBody;
use hyper::{Body, Request};
use std::convert::Infallible;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use warp::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use warp::reply::Response;

/// Logs when a request starts and finishes.
///
/// The finishing line carries the duration, the status, the content type and
/// the size of the response body.
#[derive(Clone, Copy, Debug, Default)]
pub struct InspectRequestLayer;

impl<S> Layer<S> for InspectRequestLayer {
    type Service = InspectRequest<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InspectRequest { inner }
    }
}

#[derive(Clone)]
pub struct InspectRequest<S> {
    inner: S,
}

fn body_size(response: &Response) -> u64 {
    response
        .body()
        .size_hint()
        .exact()
        .or_else(|| {
            response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok())
        })
        .unwrap_or_default()
}

impl<S> Service<Request<Body>> for InspectRequest<S>
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
        let path = req.uri().path().to_string();

        Box::pin(async move {
            let watch = Watch::start();
            tracing::info!(path = %path, "request: started");

            let response = inner.call(req).await?;

            let status = response.status();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default();
            tracing::info!(
                path = %path,
                dur = ?watch.elapsed(),
                us = watch.elapsed_us(),
                bytes_written = body_size(&response),
                status = status.as_u16(),
                status_text = status.canonical_reason().unwrap_or_default(),
                content_type,
                "request: finished"
            );

            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::middleware::testing::{body_string, respond_with};
    use tower::ServiceExt;

    #[test]
    fn body_size_uses_exact_size_hint() {
        let response = Response::new(Body::from("12345"));

        assert_eq!(body_size(&response), 5);
    }

    #[tokio::test]
    async fn passes_responses_through_unchanged() {
        let service = InspectRequestLayer.layer(respond_with("inspected"));

        let response = service
            .oneshot(Request::builder().uri("/inspect").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(body_string(response).await, "inspected");
    }
}
