//! Runs HTTP services behind an API Gateway HTTP API (payload format 2.0).
//!
//! [`handle`] converts the gateway event into an HTTP request, drives any tower
//! service with it (an [`App`](crate::web::app::App) service or a plain warp
//! filter via `warp::service`) and converts the response back into the shape
//! the gateway expects.

use anyhow::{Context, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hyper::{Body, Request, Response};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use tower::{Service, ServiceExt};
use warp::http::Version;
use warp::http::header::{CONTENT_TYPE, COOKIE};

/// An incoming API Gateway V2 event. Only the fields needed to rebuild the
/// request are modelled.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayV2Request {
    #[serde(default)]
    pub raw_path: String,
    #[serde(default)]
    pub raw_query_string: String,
    #[serde(default)]
    pub cookies: Vec<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub request_context: RequestContext,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub http: HttpDescription,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct HttpDescription {
    pub method: String,
    pub path: String,
    pub protocol: String,
    #[serde(default)]
    pub source_ip: String,
}

/// The response handed back to API Gateway.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayV2Response {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

/// Converts a header name like `content-type` into `Content-Type`.
pub fn canonical_header_key(key: &str) -> String {
    key.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Parses protocol strings like `HTTP/1.1`.
pub fn parse_http_version(protocol: &str) -> anyhow::Result<Version> {
    let parsed = protocol
        .strip_prefix("HTTP/")
        .and_then(|version| version.split_once('.'))
        .and_then(|(major, minor)| Some((major.parse::<u8>().ok()?, minor.parse::<u8>().ok()?)));

    match parsed {
        Some((0, 9)) => Ok(Version::HTTP_09),
        Some((1, 0)) => Ok(Version::HTTP_10),
        Some((1, 1)) => Ok(Version::HTTP_11),
        Some((2, 0)) => Ok(Version::HTTP_2),
        Some((3, 0)) => Ok(Version::HTTP_3),
        _ => bail!("http: parse http version: couldn't parse version {}", protocol),
    }
}

fn into_request(event: ApiGatewayV2Request) -> anyhow::Result<Request<Body>> {
    let http = &event.request_context.http;
    let version = parse_http_version(&http.protocol)?;

    let path = if event.raw_path.is_empty() {
        http.path.as_str()
    } else {
        event.raw_path.as_str()
    };
    let uri = if event.raw_query_string.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, event.raw_query_string)
    };

    let mut builder = Request::builder()
        .method(http.method.as_str())
        .uri(uri.as_str())
        .version(version);
    for (key, value) in &event.headers {
        builder = builder.header(canonical_header_key(key), value.as_str());
    }
    if !event.cookies.is_empty() {
        builder = builder.header(COOKIE, event.cookies.join("; "));
    }

    let body = match event.body {
        Some(body) if !body.is_empty() && event.is_base64_encoded => Body::from(
            STANDARD
                .decode(body.as_bytes())
                .context("Failed to decode base64 request body")?,
        ),
        Some(body) if !body.is_empty() => Body::from(body),
        _ => Body::empty(),
    };

    builder
        .body(body)
        .with_context(|| format!("url: parse request uri '{}'", uri))
}

async fn into_gateway_response(response: Response<Body>) -> anyhow::Result<ApiGatewayV2Response> {
    let (parts, body) = response.into_parts();

    let mut headers: HashMap<String, String> = HashMap::new();
    for key in parts.headers.keys() {
        let values: Vec<&str> = parts
            .headers
            .get_all(key)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        headers.insert(canonical_header_key(key.as_str()), values.join(", "));
    }

    let is_image = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.starts_with("image/"));

    let bytes = hyper::body::to_bytes(body)
        .await
        .context("Failed to read response body")?;

    let (body, is_base64_encoded) = match (is_image, String::from_utf8(bytes.to_vec())) {
        (false, Ok(text)) => (text, false),
        _ => (STANDARD.encode(&bytes), true),
    };

    Ok(ApiGatewayV2Response {
        status_code: parts.status.as_u16(),
        headers,
        body,
        is_base64_encoded,
    })
}

/// Answers a single gateway event with the given service.
pub async fn handle<S>(service: S, event: ApiGatewayV2Request) -> anyhow::Result<ApiGatewayV2Response>
where
    S: Service<Request<Body>, Response = Response<Body>, Error = Infallible>,
{
    let request = into_request(event)?;
    let response = service
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});

    into_gateway_response(response).await
}

/// Drives the app via the AWS Lambda runtime until the runtime shuts down.
#[cfg(feature = "aws_lambda")]
pub async fn run(app: crate::web::app::App) -> anyhow::Result<()> {
    use lambda_runtime::{LambdaEvent, service_fn};

    let service = app.service(None);
    lambda_runtime::run(service_fn(move |event: LambdaEvent<ApiGatewayV2Request>| {
        let service = service.clone();
        async move {
            handle(service, event.payload)
                .await
                .map_err(lambda_runtime::Error::from)
        }
    }))
    .await
    .map_err(|err| anyhow::anyhow!("Lambda runtime failed: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warp::Filter;

    fn event(method: &str, path: &str) -> ApiGatewayV2Request {
        ApiGatewayV2Request {
            raw_path: path.to_string(),
            request_context: RequestContext {
                http: HttpDescription {
                    method: method.to_string(),
                    path: path.to_string(),
                    protocol: "HTTP/1.1".to_string(),
                    source_ip: "192.0.2.1".to_string(),
                },
            },
            ..ApiGatewayV2Request::default()
        }
    }

    #[test]
    fn canonicalizes_header_keys() {
        assert_eq!(canonical_header_key("content-type"), "Content-Type");
        assert_eq!(canonical_header_key("X-REQUEST-ID"), "X-Request-Id");
        assert_eq!(canonical_header_key("accept"), "Accept");
    }

    #[test]
    fn parses_http_versions() {
        assert_eq!(parse_http_version("HTTP/1.1").unwrap(), Version::HTTP_11);
        assert_eq!(parse_http_version("HTTP/2.0").unwrap(), Version::HTTP_2);
        assert!(parse_http_version("SPDY/3").is_err());
        assert!(parse_http_version("").is_err());
    }

    #[test]
    fn deserializes_gateway_events() {
        let event: ApiGatewayV2Request = serde_json::from_value(json!({
            "version": "2.0",
            "rawPath": "/items",
            "rawQueryString": "page=2",
            "headers": { "content-type": "application/json" },
            "requestContext": {
                "http": {
                    "method": "POST",
                    "path": "/items",
                    "protocol": "HTTP/1.1",
                    "sourceIp": "192.0.2.1"
                }
            },
            "body": "eyJhIjoxfQ==",
            "isBase64Encoded": true
        }))
        .unwrap();

        assert_eq!(event.raw_query_string, "page=2");
        assert_eq!(event.request_context.http.method, "POST");
        assert!(event.is_base64_encoded);
    }

    #[tokio::test]
    async fn drives_warp_filters() {
        let filter = warp::post()
            .and(warp::path!("items"))
            .and(warp::query::raw())
            .and(warp::body::bytes())
            .map(|query: String, body: bytes::Bytes| {
                warp::reply::with_header(
                    format!("{} {}", query, String::from_utf8_lossy(&body)),
                    "x-multi",
                    "a",
                )
            });

        let mut event = event("POST", "/items");
        event.raw_query_string = "page=2".to_string();
        event.body = Some(STANDARD.encode(r#"{"a":1}"#));
        event.is_base64_encoded = true;

        let response = handle(warp::service(filter), event).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, r#"page=2 {"a":1}"#);
        assert!(!response.is_base64_encoded);
        assert_eq!(response.headers["X-Multi"], "a");
    }

    #[tokio::test]
    async fn joins_multi_value_headers_and_encodes_images() {
        let filter = warp::any().map(|| {
            let mut response = warp::reply::Response::new(Body::from(vec![0x89_u8, 0x50, 0x4e, 0x47]));
            let headers = response.headers_mut();
            headers.insert(CONTENT_TYPE, "image/png".parse().unwrap());
            headers.append("x-tag", "a".parse().unwrap());
            headers.append("x-tag", "b".parse().unwrap());
            response
        });

        let response = handle(warp::service(filter), event("GET", "/logo.png"))
            .await
            .unwrap();

        assert!(response.is_base64_encoded);
        assert_eq!(response.body, STANDARD.encode([0x89_u8, 0x50, 0x4e, 0x47]));
        assert_eq!(response.headers["X-Tag"], "a, b");
        assert_eq!(response.headers["Content-Type"], "image/png");
    }

    #[tokio::test]
    async fn rejects_unknown_protocols() {
        let mut event = event("GET", "/");
        event.request_context.http.protocol = "carrier-pigeon".to_string();

        let filter = warp::any().map(|| "unreachable");
        assert!(handle(warp::service(filter), event).await.is_err());
    }
}
