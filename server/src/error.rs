use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub type Result<A> = std::result::Result<A, AppError>;

/// Request failure, rendered as `{"error": "..."}`.
///
/// Anything converted through `?` is an internal error; client mistakes are
/// built explicitly with [`AppError::bad_request`], or carry the status of the
/// axum rejection they come from (413 for bodies over the limit).
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> AppError {
        AppError { status, error: anyhow::anyhow!(message.into()) }
    }

    pub fn bad_request(message: impl Into<String>) -> AppError {
        AppError::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = format!("{:#}", self.error);
        if self.status.is_server_error() {
            error!("{message}");
        } else {
            warn!("{message}");
        }
        (self.status, Json(json!({ "error": message }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        AppError { status: StatusCode::INTERNAL_SERVER_ERROR, error: err.into() }
    }
}
