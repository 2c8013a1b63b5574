use axum::{http::StatusCode, response::{IntoResponse, Response}};
use tracing::error;

use crate::ChatError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<ChatError>() {
            Some(ChatError::Authentication(_)) => StatusCode::UNAUTHORIZED,
            Some(ChatError::AccessDenied) => StatusCode::FORBIDDEN,
            Some(ChatError::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(ChatError::Validation(_) | ChatError::InvalidReference) => StatusCode::BAD_REQUEST,
            Some(ChatError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            Some(ChatError::Persistence(_)) | None => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("{}\n\n{}", self.0, self.0.backtrace());
            return (status, "server error").into_response();
        }

        (status, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
