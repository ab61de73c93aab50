use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

use crate::logic::{Permission, ValidationError};
use crate::model::{Id, ResourceKind};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

/// Failure of one request.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Answered as 400 with the message as plain-text body
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{kind} {id} not found")]
    NotFound { kind: ResourceKind, id: Id },
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("permission {} required", .0.as_str())]
    Forbidden(Permission),
    #[error(transparent)]
    Internal(anyhow::Error),
}

/// Store errors are internal unless they carry a validation failure found
/// while applying the write.
impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<ValidationError>() {
            Ok(validation) => ApiError::Validation(validation),
            Err(error) => ApiError::Internal(error),
        }
    }
}

impl ApiError {
    pub fn not_found(kind: ResourceKind, id: Id) -> Self {
        ApiError::NotFound { kind, id }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::Validation(e) => {
                log::debug!("Rejected request: {}", e);
                (
                    status,
                    [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                    e.to_string(),
                )
                    .into_response()
            }
            ApiError::Internal(e) => {
                log::error!("Request failed: {:#}", e);
                (status, Json(ErrorResponse::new("internal server error"))).into_response()
            }
            other => (status, Json(ErrorResponse::new(&other.to_string()))).into_response(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
