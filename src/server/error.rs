use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::service::{ErrorCategory, ServiceError};

use super::dto::ErrorBody;

const LOG_TARGET: &str = "server::error";

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Service(ServiceError),
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::Validation | ErrorCategory::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorBody::new(ErrorCategory::NotFound, message),
            ),
            ApiError::Service(err) => {
                let category = err.category();
                if category == ErrorCategory::Internal {
                    error!(target: LOG_TARGET, error = %err, "internal server error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorBody::new(category, "internal error"),
                    )
                } else {
                    let mut body = ErrorBody::new(category, err.to_string());
                    body.field = err.field();
                    if let ServiceError::Validation { index, .. } = &err {
                        body.index = *index;
                    }
                    (status_for(category), body)
                }
            }
        };
        (status, Json(body)).into_response()
    }
}
