//! Request id generation and lookup.
//!
//! Ids look like `<prefix>-<counter>` where the counter is zero padded to nine
//! digits. The id of the request being processed is kept in a task-local by
//! [`crate::web::middleware::RequestIdLayer`] and can be fetched anywhere below
//! it via [`current`].

use crate::web::REQUEST_ID_HEADER;
use rand::Rng;
use rand::distr::Alphanumeric;
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::sync::atomic::{AtomicU64, Ordering};
use warp::Filter;
use warp::http::HeaderMap;

/// The id assigned to a single request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

tokio::task_local! {
    static CURRENT: RequestId;
}

/// Returns the id of the request being processed by the current task, if any.
pub fn current() -> Option<RequestId> {
    CURRENT.try_with(Clone::clone).ok()
}

/// Runs the given future with `id` as the current request id.
pub async fn scope<F: Future>(id: RequestId, future: F) -> F::Output {
    CURRENT.scope(id, future).await
}

/// Produces request ids from a fixed prefix and a monotonic counter.
#[derive(Debug)]
pub struct Generator {
    prefix: String,
    counter: AtomicU64,
}

impl Generator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Generator {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Generates a fresh id.
    pub fn generate(&self) -> RequestId {
        let count = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        RequestId(format!("{}-{:09}", self.prefix, count))
    }

    /// Reuses a non-empty `X-Request-Id` header or generates a fresh id.
    pub fn next(&self, headers: &HeaderMap) -> RequestId {
        headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| RequestId(value.to_string()))
            .unwrap_or_else(|| self.generate())
    }
}

/// A random prefix of `len` hexadecimal digits.
pub fn random_prefix(len: usize) -> String {
    let mut rng = crate::cryptorand::new();
    (0..len)
        .map(|_| char::from_digit(rng.random_range(0..16), 16).unwrap_or('0'))
        .collect()
}

/// A prefix built from the host name and ten random alphanumerics.
pub fn hostname_prefix() -> String {
    let hostname = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string());

    let suffix: String = crate::cryptorand::new()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();

    format!("{}/{}", hostname, suffix)
}

/// Process wide generator used by the request id middleware.
pub static DEFAULT_GENERATOR: LazyLock<Arc<Generator>> =
    LazyLock::new(|| Arc::new(Generator::new(hostname_prefix())));

/// Extracts the current request id.
///
/// Falls back to the request's own `X-Request-Id` header and finally to a fresh
/// id when the request did not pass through the middleware.
pub fn with_request_id() -> impl Filter<Extract = (RequestId,), Error = Infallible> + Clone {
    warp::header::headers_cloned()
        .map(|headers: HeaderMap| current().unwrap_or_else(|| DEFAULT_GENERATOR.next(&headers)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::http::HeaderValue;

    #[test]
    fn generator_counts_up_with_padding() {
        let generator = Generator::new("host/abc");

        assert_eq!(generator.generate().as_str(), "host/abc-000000001");
        assert_eq!(generator.generate().as_str(), "host/abc-000000002");
    }

    #[test]
    fn generator_reuses_incoming_header() {
        let generator = Generator::new("p");
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("upstream-42"));

        assert_eq!(generator.next(&headers).as_str(), "upstream-42");

        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static(""));
        assert_eq!(generator.next(&headers).as_str(), "p-000000001");
    }

    #[test]
    fn random_prefix_is_hex() {
        let prefix = random_prefix(12);

        assert_eq!(prefix.len(), 12);
        assert!(prefix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hostname_prefix_has_random_suffix() {
        let prefix = hostname_prefix();
        let (host, suffix) = prefix.rsplit_once('/').unwrap();

        assert!(!host.is_empty());
        assert_eq!(suffix.len(), 10);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn current_is_visible_within_scope_only() {
        assert_eq!(current(), None);

        let seen = scope(RequestId("req-1".to_string()), async { current() }).await;
        assert_eq!(seen, Some(RequestId("req-1".to_string())));
    }

    #[tokio::test]
    async fn filter_prefers_scoped_id() {
        let filter = with_request_id();

        let id = scope(RequestId("scoped".to_string()), async {
            warp::test::request()
                .header(REQUEST_ID_HEADER, "from-header")
                .filter(&filter)
                .await
                .unwrap()
        })
        .await;
        assert_eq!(id.as_str(), "scoped");

        let id = warp::test::request()
            .header(REQUEST_ID_HEADER, "from-header")
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(id.as_str(), "from-header");
    }
}
