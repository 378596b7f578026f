//! A small demo service.
//!
//! ```text
//! GET  /hello          -> {"greeting":"Hello, world"}
//! GET  /hello/{name}   -> {"greeting":"Hello, {name}"}
//! POST /echo           -> echoes a checked JSON body
//! GET  /health         -> aggregated health report
//! ```

use kit::Check;
use kit::web::app::{App, ServerConfig};
use kit::web::body::with_checked_json;
use kit::web::health::health_check_fn;
use kit::web::request_id;
use kit::web::respond::DEFAULT_RESPONDER;
use kit::web::router::{Router, response_header};
use kit::web::shutdown::shutdown_fn;
use kit::web::DEFAULT_MAX_JSON_BODY_SIZE;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use warp::Filter;
use warp::http::{HeaderName, HeaderValue, StatusCode};

#[derive(Serialize)]
struct Greeting {
    greeting: String,
    request_id: Option<String>,
}

#[derive(Serialize, Deserialize, Check)]
struct Echo {
    #[check(required, length(max = 280))]
    message: String,
}

fn greet(name: &str) -> warp::reply::Response {
    DEFAULT_RESPONDER.success(
        StatusCode::OK,
        &Greeting {
            greeting: format!("Hello, {}", name),
            request_id: request_id::current().map(|id| id.0),
        },
    )
}

fn router() -> Router {
    Router::new()
        .with(response_header(
            HeaderName::from_static("x-served-by"),
            HeaderValue::from_static("kit-server"),
        ))
        .route("hello", |hello| {
            hello
                .get(warp::path::end().map(|| greet("world")))
                .get(warp::path!(String).map(|name: String| greet(&name)))
        })
        .post(
            warp::path!("echo")
                .and(with_checked_json::<Echo>(DEFAULT_MAX_JSON_BODY_SIZE))
                .map(|echo: Echo| DEFAULT_RESPONDER.success(StatusCode::OK, &echo)),
        )
}

fn app() -> App {
    App::new(router())
        .with_health_check(health_check_fn("self", || async { Ok(()) }))
        .with_health_endpoint(Some(Duration::from_secs(2)))
        .with_shutdown(shutdown_fn("goodbye", || async {
            tracing::info!("Goodbye");
            Ok(())
        }))
        .with_api_version(kit::APP_VERSION.as_str())
}

/// Inside AWS Lambda the app answers API Gateway events instead of binding a port.
#[cfg(feature = "aws_lambda")]
async fn run(app: App) -> anyhow::Result<()> {
    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        kit::aws::apigateway::run(app).await
    } else {
        app.serve(ServerConfig::from_env()?).await
    }
}

#[cfg(not(feature = "aws_lambda"))]
async fn run(app: App) -> anyhow::Result<()> {
    app.serve(ServerConfig::from_env()?).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kit::logging::setup_tracing();
    run(app()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn greets_by_name() {
        let response = warp::test::request()
            .path("/hello/ada")
            .reply(&app().route())
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-served-by"], "kit-server");
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["greeting"], "Hello, ada");
    }

    #[tokio::test]
    async fn rejects_empty_echo() {
        let response = warp::test::request()
            .method("POST")
            .path("/echo")
            .header("content-type", "application/json")
            .body(r#"{"message":""}"#)
            .reply(&app().route())
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"], "'message' is required");
    }
}
