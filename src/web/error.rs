//! Error types and helpers for mapping errors to HTTP responses.
//!
//! The [`ApiError`] type carries an HTTP status code, an optional enum-style
//! code (e.g. `INVALID_TOKEN`), a message and optional info. Use [`ResultExt`] to attach it to
//! `anyhow::Error` chains, or the [`client_bail!`](crate::client_bail) and
//! [`status_bail!`](crate::status_bail) macros for early returns.
//!
//! Structured details for the `info` field of an error body are attached via
//! [`err_with_info`].

use serde::Serialize;
use std::fmt::{Debug, Display, Formatter};
use warp::http::StatusCode;
use warp::reject::Reject;

/// An error which knows how it should be presented to an HTTP client.
#[derive(Clone, Debug)]
pub struct ApiError {
    /// HTTP status code for the response.
    pub status: StatusCode,
    /// Optional machine-readable error code.
    pub code: Option<String>,
    /// Human-readable error message.
    pub message: String,
    /// Structured details rendered into the `info` field of the error body.
    pub info: Option<serde_json::Value>,
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl Reject for ApiError {}

impl ApiError {
    /// Creates a new API error with the given HTTP status and message.
    pub fn new(status: StatusCode, message: impl ToString) -> Self {
        ApiError {
            status,
            code: None,
            message: message.to_string(),
            info: None,
        }
    }

    /// Attaches an enum-style error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Locates the outermost [`ApiError`] within the given error chain.
    pub fn find(err: &anyhow::Error) -> Option<&ApiError> {
        err.downcast_ref::<ApiError>()
    }
}

/// An error carrying additional, serializable context for the client.
#[derive(Clone, Debug)]
pub struct ErrorInfo {
    message: String,
    info: serde_json::Value,
}

impl ErrorInfo {
    /// Returns the structured context.
    pub fn info(&self) -> &serde_json::Value {
        &self.info
    }

    /// Locates the outermost [`ErrorInfo`] within the given error chain.
    pub fn find(err: &anyhow::Error) -> Option<&ErrorInfo> {
        err.downcast_ref::<ErrorInfo>()
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ErrorInfo {}

/// Wraps the given error so that `info` is rendered into the `info` field of
/// the JSON error body.
///
/// If `info` cannot be serialized, the field is rendered as `null`.
pub fn err_with_info(err: impl Into<anyhow::Error>, info: impl Serialize) -> anyhow::Error {
    let err = err.into();
    let info = serde_json::to_value(info).unwrap_or_else(|serialization_error| {
        tracing::warn!("Failed to serialize error info: {}", serialization_error);
        serde_json::Value::Null
    });

    let wrapped = ErrorInfo {
        message: format!("{:#}", err),
        info,
    };

    match ApiError::find(&err).cloned() {
        Some(mut api_error) => {
            api_error.info = Some(wrapped.info.clone());
            anyhow::Error::new(wrapped).context(api_error)
        }
        None => anyhow::Error::new(wrapped),
    }
}

/// Extension trait for attaching HTTP status codes to error results.
pub trait ResultExt<T> {
    /// Wraps the error with an [`ApiError`] carrying the given status code.
    fn with_status(self, status: StatusCode) -> Result<T, anyhow::Error>;

    /// Wraps the error with an [`ApiError`] carrying the given status and error code.
    fn with_code(self, status: StatusCode, code: &str) -> Result<T, anyhow::Error>;

    /// Convenience method for `with_status(StatusCode::BAD_REQUEST)`.
    fn mark_client_error(self) -> Result<T, anyhow::Error>;

    /// Marks the error as a client error unless it already carries an [`ApiError`].
    fn or_client_error(self) -> Result<T, anyhow::Error>;
}

impl<T> ResultExt<T> for Result<T, anyhow::Error> {
    fn with_status(self, status: StatusCode) -> Result<T, anyhow::Error> {
        self.map_err(|err| {
            let message = format!("{:#}", err);
            err.context(ApiError::new(status, message))
        })
    }

    fn with_code(self, status: StatusCode, code: &str) -> Result<T, anyhow::Error> {
        self.map_err(|err| {
            let message = format!("{:#}", err);
            err.context(ApiError::new(status, message).with_code(code))
        })
    }

    fn mark_client_error(self) -> Result<T, anyhow::Error> {
        self.with_status(StatusCode::BAD_REQUEST)
    }

    fn or_client_error(self) -> Result<T, anyhow::Error> {
        match self {
            Err(err) if ApiError::find(&err).is_none() => Err(err).mark_client_error(),
            other => other,
        }
    }
}

/// Early return with a 400 Bad Request error.
#[macro_export]
macro_rules! client_bail {
    ($err:expr $(,)?) => {
        return $crate::web::error::ResultExt::mark_client_error(Err(::anyhow::anyhow!($err)))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return $crate::web::error::ResultExt::mark_client_error(Err(::anyhow::anyhow!($fmt, $($arg)*)))
    };
}

/// Early return with a custom HTTP status code.
#[macro_export]
macro_rules! status_bail {
    ($status:expr, $msg:literal $(,)?) => {
        return $crate::web::error::ResultExt::with_status(Err(::anyhow::anyhow!($msg)), $status)
    };
    ($status:expr, $fmt:literal, $($arg:tt)*) => {
        return $crate::web::error::ResultExt::with_status(Err(::anyhow::anyhow!($fmt, $($arg)*)), $status)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;

    fn fails_with_client_error() -> anyhow::Result<()> {
        client_bail!("Missing field '{}'", "name");
    }

    #[test]
    fn client_bail_attaches_bad_request() {
        let err = fails_with_client_error().unwrap_err();
        let api_error = ApiError::find(&err).unwrap();

        assert_eq!(api_error.status, StatusCode::BAD_REQUEST);
        assert_eq!(api_error.message, "Missing field 'name'");
        assert_eq!(api_error.code, None);
    }

    #[test]
    fn with_code_attaches_status_and_code() {
        let err = Err::<(), _>(anyhow!("token expired"))
            .with_code(StatusCode::UNAUTHORIZED, "INVALID_TOKEN")
            .unwrap_err();
        let api_error = ApiError::find(&err).unwrap();

        assert_eq!(api_error.status, StatusCode::UNAUTHORIZED);
        assert_eq!(api_error.code.as_deref(), Some("INVALID_TOKEN"));
    }

    #[test]
    fn or_client_error_keeps_existing_status() {
        let err = Err::<(), _>(anyhow!("gone"))
            .with_status(StatusCode::GONE)
            .or_client_error()
            .unwrap_err();
        assert_eq!(ApiError::find(&err).map(|e| e.status), Some(StatusCode::GONE));

        let err = Err::<(), _>(anyhow!("odd input")).or_client_error().unwrap_err();
        assert_eq!(ApiError::find(&err).map(|e| e.status), Some(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn err_with_info_is_discoverable_in_chain() {
        let err = err_with_info(anyhow!("bad request"), json!({ "problem": "Bad user ID" }));

        assert_eq!(format!("{:#}", err), "bad request");
        assert_eq!(
            ErrorInfo::find(&err).map(ErrorInfo::info),
            Some(&json!({ "problem": "Bad user ID" }))
        );
    }

    #[test]
    fn err_with_info_keeps_api_status() {
        let err = Err::<(), _>(anyhow!("conflict"))
            .with_status(StatusCode::CONFLICT)
            .unwrap_err();
        let err = err_with_info(err, json!({ "id": 42 }));

        let api_error = ApiError::find(&err).unwrap();
        assert_eq!(api_error.status, StatusCode::CONFLICT);
        assert_eq!(api_error.info, Some(json!({ "id": 42 })));
        assert!(ErrorInfo::find(&err).is_some());
    }
}
