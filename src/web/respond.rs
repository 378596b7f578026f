//! JSON response envelopes.
//!
//! Successful responses carry the serialized body as is. Errors are wrapped in
//! an [`ErrorResponse`] which also names the request id, an optional enum-style
//! code, the HTTP status and optional structured info.

use crate::web::REQUEST_ID_HEADER;
use crate::web::error::{ApiError, ErrorInfo};
use crate::web::request_id;
use serde::Serialize;
use std::sync::LazyLock;
use warp::http::header::CONTENT_TYPE;
use warp::http::{HeaderValue, StatusCode};
use warp::reply::Response;
use warp::{Rejection, reject};

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// The body of every JSON error response.
#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct ErrorResponse {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(rename = "requestID", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
}

fn is_zero(status: &u16) -> bool {
    *status == 0
}

/// Renders values and errors as JSON responses.
///
/// With `suppress_errors` enabled, error messages are logged instead of being
/// sent to the client.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonResponder {
    pub suppress_errors: bool,
}

/// Responder configured via `SUPPRESS_ERRORS`.
pub static DEFAULT_RESPONDER: LazyLock<JsonResponder> = LazyLock::new(|| JsonResponder {
    suppress_errors: std::env::var("SUPPRESS_ERRORS")
        .map(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false),
});

impl JsonResponder {
    pub const fn new(suppress_errors: bool) -> Self {
        JsonResponder { suppress_errors }
    }

    /// Serializes `body` with the given status.
    pub fn success<S: Serialize + ?Sized>(&self, status: StatusCode, body: &S) -> Response {
        render(status, body, request_id::current().map(|id| id.0))
    }

    /// Shortcut for [`JsonResponder::coded_error`] without a code.
    pub fn error(&self, status: StatusCode, err: &anyhow::Error) -> Response {
        self.coded_error(status, None, Some(err))
    }

    /// Renders an error envelope.
    ///
    /// Without an error, the canonical reason of `status` becomes the message.
    pub fn coded_error(
        &self,
        status: StatusCode,
        code: Option<&str>,
        err: Option<&anyhow::Error>,
    ) -> Response {
        let message = match err {
            Some(err) => match ApiError::find(err) {
                Some(api_error) => api_error.message.clone(),
                None => format!("{:#}", err),
            },
            None => status.canonical_reason().unwrap_or_default().to_string(),
        };
        let info = err.and_then(|err| {
            ErrorInfo::find(err)
                .map(|info| info.info().clone())
                .or_else(|| ApiError::find(err).and_then(|api_error| api_error.info.clone()))
        });

        self.render_error(ErrorResponse {
            error: message,
            request_id: request_id::current().map(|id| id.0),
            code: code.map(str::to_string),
            status: status.as_u16(),
            info,
        })
    }

    /// Renders an [`ApiError`] using its own status, code and info.
    pub fn api_error(&self, api_error: &ApiError) -> Response {
        self.render_error(ErrorResponse {
            error: api_error.message.clone(),
            request_id: request_id::current().map(|id| id.0),
            code: api_error.code.clone(),
            status: api_error.status.as_u16(),
            info: api_error.info.clone(),
        })
    }

    /// Renders `Ok` values as 200 and errors with the status of their [`ApiError`].
    ///
    /// Errors without an [`ApiError`] become a 500.
    pub fn result<S: Serialize>(&self, result: anyhow::Result<S>) -> Response {
        match result {
            Ok(body) => self.success(StatusCode::OK, &body),
            Err(err) => match ApiError::find(&err) {
                Some(api_error) => {
                    self.coded_error(api_error.status, api_error.code.as_deref(), Some(&err))
                }
                None => self.error(StatusCode::INTERNAL_SERVER_ERROR, &err),
            },
        }
    }

    fn render_error(&self, mut body: ErrorResponse) -> Response {
        if self.suppress_errors {
            tracing::error!(
                status = body.status,
                code = body.code.as_deref().unwrap_or_default(),
                info = ?body.info,
                "error suppressed: {}",
                body.error
            );
            body.error.clear();
        }

        let status = StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let request_id = body.request_id.clone();
        render(status, &body, request_id)
    }
}

fn render<S: Serialize + ?Sized>(
    status: StatusCode,
    body: &S,
    request_id: Option<String>,
) -> Response {
    let (status, data) = match serde_json::to_vec(body) {
        Ok(data) => (status, data),
        Err(err) => {
            tracing::error!("json response: couldn't marshal response: {}", err);
            let fallback = ErrorResponse {
                error: "failed to marshal json response".to_string(),
                request_id: request_id.clone(),
                code: Some("JSON_MARSHAL".to_string()),
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                info: None,
            };
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::to_vec(&fallback).unwrap_or_default(),
            )
        }
    };

    let mut response = Response::new(data.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    if let Some(value) = request_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

/// Renders a result via the [`DEFAULT_RESPONDER`].
pub fn result<S: Serialize>(result: anyhow::Result<S>) -> Response {
    DEFAULT_RESPONDER.result(result)
}

/// Converts an error into a warp rejection carrying its [`ApiError`].
///
/// Errors without an [`ApiError`] are mapped onto a 500.
pub fn into_rejection(err: anyhow::Error) -> Rejection {
    let mut api_error = match ApiError::find(&err) {
        Some(api_error) => api_error.clone(),
        None => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", err)),
    };
    if let Some(info) = ErrorInfo::find(&err) {
        api_error.info = Some(info.info().clone());
    }

    reject::custom(api_error)
}

/// Renders any rejection as a JSON error envelope.
pub async fn handle_rejection(rejection: Rejection) -> Result<Response, Rejection> {
    Ok(rejection_response(&DEFAULT_RESPONDER, &rejection))
}

/// Maps a rejection onto a status and renders it with the given responder.
pub fn rejection_response(responder: &JsonResponder, rejection: &Rejection) -> Response {
    if let Some(api_error) = rejection.find::<ApiError>() {
        return responder.api_error(api_error);
    }

    let status = if rejection.is_not_found() {
        StatusCode::NOT_FOUND
    } else if rejection.find::<reject::MethodNotAllowed>().is_some() {
        StatusCode::METHOD_NOT_ALLOWED
    } else if rejection.find::<reject::PayloadTooLarge>().is_some() {
        StatusCode::PAYLOAD_TOO_LARGE
    } else if rejection.find::<reject::UnsupportedMediaType>().is_some() {
        StatusCode::UNSUPPORTED_MEDIA_TYPE
    } else if rejection.find::<reject::LengthRequired>().is_some() {
        StatusCode::LENGTH_REQUIRED
    } else if rejection.find::<reject::MissingHeader>().is_some()
        || rejection.find::<reject::InvalidHeader>().is_some()
        || rejection.find::<reject::InvalidQuery>().is_some()
    {
        StatusCode::BAD_REQUEST
    } else {
        tracing::error!("Unhandled rejection: {:?}", rejection);
        StatusCode::INTERNAL_SERVER_ERROR
    };

    responder.coded_error(status, None, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::error::{ResultExt, err_with_info};
    use crate::web::request_id::RequestId;
    use anyhow::anyhow;
    use serde_json::{Value, json};
    use std::collections::HashMap;

    async fn body_json(response: Response) -> Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn success_serializes_body_as_is() {
        let response = JsonResponder::default().success(StatusCode::CREATED, &json!({"id": 7}));

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[CONTENT_TYPE], JSON_CONTENT_TYPE);
        assert!(response.headers().get(REQUEST_ID_HEADER).is_none());
        assert_eq!(body_json(response).await, json!({"id": 7}));
    }

    #[tokio::test]
    async fn error_envelope_includes_request_id_and_omits_empty_fields() {
        let response = request_id::scope(RequestId("req-1".to_string()), async {
            JsonResponder::default().error(StatusCode::BAD_GATEWAY, &anyhow!("upstream down"))
        })
        .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-1");
        assert_eq!(
            body_json(response).await,
            json!({"error": "upstream down", "requestID": "req-1", "status": 502})
        );
    }

    #[tokio::test]
    async fn coded_error_without_error_uses_reason_phrase() {
        let response =
            JsonResponder::default().coded_error(StatusCode::UNAUTHORIZED, Some("INVALID_TOKEN"), None);

        assert_eq!(
            body_json(response).await,
            json!({"error": "Unauthorized", "code": "INVALID_TOKEN", "status": 401})
        );
    }

    #[tokio::test]
    async fn error_info_is_rendered() {
        let err = err_with_info(anyhow!("bad request"), json!({"problem": "Bad user ID"}));
        let response = JsonResponder::default().error(StatusCode::BAD_REQUEST, &err);

        assert_eq!(
            body_json(response).await,
            json!({"error": "bad request", "status": 400, "info": {"problem": "Bad user ID"}})
        );
    }

    #[tokio::test]
    async fn suppressed_errors_keep_everything_but_the_message() {
        let err = err_with_info(anyhow!("secret detail"), json!({"field": "name"}));
        let response = JsonResponder::new(true).error(StatusCode::INTERNAL_SERVER_ERROR, &err);

        assert_eq!(
            body_json(response).await,
            json!({"status": 500, "info": {"field": "name"}})
        );
    }

    #[tokio::test]
    async fn unserializable_body_yields_json_marshal_error() {
        let mut body = HashMap::new();
        body.insert(vec![1_u8], "non-string keys cannot become JSON");

        let response = JsonResponder::default().success(StatusCode::OK, &body);

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({"error": "failed to marshal json response", "code": "JSON_MARSHAL", "status": 500})
        );
    }

    #[tokio::test]
    async fn result_uses_status_of_api_error() {
        let failed: anyhow::Result<()> = Err(anyhow!("no such user")).with_status(StatusCode::NOT_FOUND);
        let response = JsonResponder::default().result(failed);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "no such user");

        let response = JsonResponder::default().result::<()>(Err(anyhow!("boom")));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = JsonResponder::default().result(Ok(vec![1, 2]));
        assert_eq!(body_json(response).await, json!([1, 2]));
    }

    #[tokio::test]
    async fn rejections_map_onto_envelopes() {
        let responder = JsonResponder::default();

        let response = rejection_response(&responder, &reject::not_found());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Not Found", "status": 404})
        );

        let err = err_with_info(
            Err::<(), _>(anyhow!("taken")).with_code(StatusCode::CONFLICT, "DUPLICATE").unwrap_err(),
            json!({"id": 1}),
        );
        let response = rejection_response(&responder, &into_rejection(err));
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            body_json(response).await,
            json!({"error": "taken", "code": "DUPLICATE", "status": 409, "info": {"id": 1}})
        );
    }
}
