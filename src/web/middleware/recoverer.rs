use crate::tools::panic_message;
use crate::web::middleware::ResponseFuture;
use crate::web::respond::DEFAULT_RESPONDER;
use anyhow::anyhow;
use futures_util::FutureExt;
use hyper::{Body, Request};
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use warp::http::StatusCode;
use warp::reply::Response;

/// Turns a panicking handler into a 500 JSON error.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecovererLayer;

impl<S> Layer<S> for RecovererLayer {
    type Service = Recoverer<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Recoverer { inner }
    }
}

#[derive(Clone)]
pub struct Recoverer<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for Recoverer<S>
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

        Box::pin(async move {
            match AssertUnwindSafe(async move { inner.call(req).await })
                .catch_unwind()
                .await
            {
                Ok(response) => response,
                Err(payload) => {
                    let err = anyhow!("panic: {}", panic_message(payload.as_ref()));
                    tracing::error!(mw = "Recoverer", "recovered from panic: {:#}", err);
                    Ok(DEFAULT_RESPONDER.error(StatusCode::INTERNAL_SERVER_ERROR, &err))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::middleware::testing::{body_string, respond_with};
    use tower::{ServiceExt, service_fn};

    async fn explode(_req: Request<Body>) -> Result<Response, Infallible> {
        panic!("handler exploded")
    }

    #[tokio::test]
    async fn panics_become_internal_server_errors() {
        let service = RecovererLayer.layer(service_fn(explode));

        let response = service
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["error"], "panic: handler exploded");
    }

    #[tokio::test]
    async fn regular_responses_pass_through() {
        let service = RecovererLayer.layer(respond_with("fine"));

        let response = service
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(body_string(response).await, "fine");
    }
}
