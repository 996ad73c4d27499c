use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{0}")]
    BadRequest(String),
    #[error("no route for {0}")]
    NotFound(String),
    #[error(transparent)]
    Processing(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl ServerError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ServerError::BadRequest(_) => "bad_request",
            ServerError::NotFound(_) => "not_found",
            ServerError::Processing(_) => "processing_failed",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // alternate formatting includes the anyhow context chain
        let message = format!("{self:#}");
        match &self {
            ServerError::Processing(_) => error!("Request failed: {message}"),
            ServerError::BadRequest(_) => warn!("Rejected request: {message}"),
            ServerError::NotFound(_) => {}
        }
        let body = ErrorResponse {
            error: self.kind(),
            message,
        };
        (self.status(), Json(body)).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
