//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`chunkstream_common::Error`] so that route
//! handlers can return `Result<T, AppError>` and use `?` on engine calls.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chunkstream_common::Error;
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: Error) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = Some(id);
        self
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in stream handler"
            );
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
            "retryable": self.inner.is_retryable(),
            "request_id": self.request_id,
        });

        let mut response = (status, axum::Json(body)).into_response();

        match &self.inner {
            Error::RangeNotSatisfiable { object_size } => {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", object_size)) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
            }
            Error::RateLimited { retry_after } | Error::PoolExhausted { retry_after } => {
                let secs = retry_after.as_secs().max(1);
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs));
            }
            _ => {}
        }

        response
    }
}
