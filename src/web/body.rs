//! Request body extraction.
//!
//! Every filter requires a `Content-Length` header, refuses empty or oversized
//! bodies and stops reading once more data arrives than announced. Failures are
//! rejected with an [`ApiError`](crate::web::error::ApiError) so that
//! [`handle_rejection`](crate::web::respond::handle_rejection) renders them as
//! a 400 JSON error.

use crate::check::Check;
use crate::client_bail;
use crate::web::error::ResultExt;
use crate::web::respond::into_rejection;
use anyhow::{Context, anyhow};
use bytes::{Buf, BufMut};
use futures_util::{Stream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::error::Error;
use warp::http::header::CONTENT_LENGTH;
use warp::{Filter, Rejection};

pub fn content_length_header() -> impl Filter<Extract = (u64,), Error = Rejection> + Clone {
    warp::header::header::<u64>(CONTENT_LENGTH.as_str())
}

pub fn with_cloneable<C: Clone + Send>(
    value: C,
) -> impl Filter<Extract = (C,), Error = Infallible> + Clone {
    warp::any().map(move || value.clone())
}

pub fn with_body_as_buffer(
    max_body_size: u64,
) -> impl Filter<Extract = (Vec<u8>,), Error = Rejection> + Clone {
    warp::body::stream()
        .and(content_length_header())
        .and(with_cloneable(max_body_size))
        .and_then(async move |stream, content_length, max_body_size| {
            body_as_buffer(stream, content_length, max_body_size)
                .await
                .map_err(into_rejection)
        })
}

async fn body_as_buffer(
    stream: impl Stream<Item = Result<impl Buf + Send + 'static, warp::Error>> + Unpin + Send + 'static,
    content_length: u64,
    max_body_size: u64,
) -> anyhow::Result<Vec<u8>> {
    if content_length == 0 {
        client_bail!("Empty input data");
    }
    if content_length > max_body_size {
        client_bail!("The given request data is too large");
    }

    let stream = as_size_limited_stream(stream, content_length);
    read_into_buffer(stream, content_length).await
}

fn as_size_limited_stream<E: Error + Send + Sync + 'static>(
    stream: impl Stream<Item = Result<impl Buf, E>> + Unpin + Send,
    content_length: u64,
) -> impl Stream<Item = Result<impl Buf, std::io::Error>> + Unpin {
    let mut remaining_bytes = i64::try_from(content_length).unwrap_or(i64::MAX);

    stream.map(move |result| match result {
        Ok(bytes) => {
            remaining_bytes -= bytes.remaining() as i64;
            if remaining_bytes < 0 {
                Err(std::io::Error::other(anyhow!("Input data too large")))
            } else {
                Ok(bytes)
            }
        }
        Err(err) => Err(std::io::Error::other(err)),
    })
}

async fn read_into_buffer(
    mut stream: impl Stream<Item = Result<impl Buf, std::io::Error>> + Unpin,
    content_length: u64,
) -> anyhow::Result<Vec<u8>> {
    let mut data = Vec::with_capacity(usize::try_from(content_length).unwrap_or_default());
    while let Some(chunk) = stream
        .try_next()
        .await
        .context("Failed to read body")
        .mark_client_error()?
    {
        data.put(chunk);
    }

    Ok(data)
}

pub fn with_body_as_string(
    max_body_size: u64,
) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    with_body_as_buffer(max_body_size).and_then(async |data: Vec<u8>| {
        String::from_utf8(data)
            .context("Received invalid UTF-8 data")
            .mark_client_error()
            .map_err(into_rejection)
    })
}

pub fn with_body_as_json<T: DeserializeOwned + Send>(
    max_body_size: u64,
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    with_body_as_buffer(max_body_size)
        .and_then(async |data: Vec<u8>| decode_json(&data).map_err(into_rejection))
}

/// Decodes a JSON body and validates it via [`Check`].
pub fn with_checked_json<T: DeserializeOwned + Check + Send>(
    max_body_size: u64,
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    with_body_as_buffer(max_body_size).and_then(async |data: Vec<u8>| {
        decode_json::<T>(&data)
            .and_then(|decoded| {
                decoded.check().or_client_error()?;
                Ok(decoded)
            })
            .map_err(into_rejection)
    })
}

fn decode_json<T: DeserializeOwned>(data: &[u8]) -> anyhow::Result<T> {
    serde_json::from_slice(data)
        .context("Invalid JSON input")
        .mark_client_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::respond::handle_rejection;
    use bytes::Bytes;
    use futures_util::stream;
    use serde::Deserialize;
    use serde_json::Value;
    use warp::http::StatusCode;

    #[derive(Deserialize, Debug)]
    struct Greeting {
        name: String,
    }

    impl Check for Greeting {
        fn check(&self) -> crate::check::CheckResult {
            crate::check::required("name", &self.name)
        }
    }

    #[tokio::test]
    async fn as_size_limited_stream_allows_valid_size() {
        let stream = stream::iter(vec![Ok::<Bytes, warp::Error>(Bytes::from("hello"))]);
        let result: Vec<_> = as_size_limited_stream(stream, 5).collect().await;

        assert!(result.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn as_size_limited_stream_rejects_oversize_input() {
        let stream = stream::iter(vec![
            Ok::<Bytes, warp::Error>(Bytes::from("hello")),
            Ok::<Bytes, warp::Error>(Bytes::from("world")),
            Ok::<Bytes, warp::Error>(Bytes::from("foobar")),
        ]);
        let result: Vec<_> = as_size_limited_stream(stream, 5).collect().await;

        assert_eq!(result.iter().filter(|res| res.is_ok()).count(), 1);
        assert_eq!(result.iter().filter(|res| res.is_err()).count(), 2);
    }

    #[tokio::test]
    async fn as_size_limited_stream_propagates_stream_errors() {
        let stream = stream::iter(vec![Err::<Bytes, std::io::Error>(std::io::Error::other(
            "Test error",
        ))]);
        let result: Vec<_> = as_size_limited_stream(stream, 5).collect().await;

        assert!(result.iter().any(|res| res.is_err()));
    }

    #[tokio::test]
    async fn json_body_is_decoded() {
        let filter = with_body_as_json::<Greeting>(1024);

        let greeting = warp::test::request()
            .method("POST")
            .body(r#"{"name":"kit"}"#)
            .filter(&filter)
            .await
            .unwrap();

        assert_eq!(greeting.name, "kit");
    }

    #[tokio::test]
    async fn string_body_rejects_oversized_input() {
        let filter = with_body_as_string(4).recover(handle_rejection);

        let response = warp::test::request()
            .method("POST")
            .body("too long")
            .reply(&filter)
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"], "The given request data is too large");
    }

    #[tokio::test]
    async fn checked_json_answers_bad_request_on_failed_check() {
        let filter = with_checked_json::<Greeting>(1024)
            .map(|greeting: Greeting| greeting.name)
            .recover(handle_rejection);

        let response = warp::test::request()
            .method("POST")
            .body(r#"{"name":""}"#)
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"], "'name' is required");

        let response = warp::test::request()
            .method("POST")
            .body("not json")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
