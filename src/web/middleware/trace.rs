use crate::web::middleware::ResponseFuture;
use crate::web::request_id::RequestId;
use hyper::{Body, Request};
use std::convert::Infallible;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{Instrument, Span, info_span};
use warp::reply::Response;

/// Runs each request within an `http_request` span.
///
/// Place it below [`RequestIdLayer`](super::RequestIdLayer) so that the span
/// knows the request id.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLayer;

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingService { inner }
    }
}

#[derive(Clone)]
pub struct TracingService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for TracingService<S>
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
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let request_id = req
            .extensions()
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_default();

        #[cfg_attr(not(feature = "open_telemetry"), allow(unused_mut))]
        let mut span = info_span!(
            "http_request",
            app = crate::APP_NAME.as_str(),
            cluster = crate::CLUSTER_ID.as_str(),
            request_id = %request_id,
            http.method = %method,
            http.url = %path,
            http.status_code = tracing::field::Empty,
        );

        #[cfg(feature = "open_telemetry")]
        open_telemetry::extract_parent_context(req.headers(), &mut span);

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let fut = async move {
            let response = inner.call(req).await?;
            Span::current().record("http.status_code", response.status().as_u16());
            Ok(response)
        }
        .instrument(span);

        Box::pin(fut)
    }
}

#[cfg(feature = "open_telemetry")]
mod open_telemetry {
    use opentelemetry::propagation::Extractor;
    use tracing::Span;
    use tracing_opentelemetry::OpenTelemetrySpanExt;
    use warp::http::HeaderMap;

    struct HeaderExtractor<'a> {
        headers: &'a HeaderMap,
    }

    impl Extractor for HeaderExtractor<'_> {
        fn get(&self, key: &str) -> Option<&str> {
            self.headers.get(key).and_then(|value| value.to_str().ok())
        }

        fn keys(&self) -> Vec<&str> {
            self.headers.keys().map(|header| header.as_str()).collect()
        }
    }

    /// Makes an incoming W3C trace context the parent of `span`.
    pub fn extract_parent_context(headers: &HeaderMap, span: &mut Span) {
        let extractor = HeaderExtractor { headers };
        let parent_cx =
            opentelemetry::global::get_text_map_propagator(|prop| prop.extract(&extractor));
        span.set_parent(parent_cx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::middleware::testing::{body_string, respond_with};
    use tower::ServiceExt;

    #[tokio::test]
    async fn passes_responses_through() {
        let service = TracingLayer.layer(respond_with("traced"));

        let response = service
            .oneshot(Request::builder().uri("/traced").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(body_string(response).await, "traced");
    }
}
