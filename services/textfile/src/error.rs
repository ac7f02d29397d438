use crate::authorizer::AuthError;
use crate::content_codec::DecodeError;
use crate::line_store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Outcome of a request that did not succeed
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Unauthorized(#[from] AuthError),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Storage(#[from] StoreError),

    #[error("{0}")]
    Decode(#[from] DecodeError),

    /// The request outlived the API deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Storage(_) | ServiceError::Decode(_) | ServiceError::Timeout(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::info!(error = %self, status = status.as_u16(), "Request rejected");
        }

        (
            status,
            Json(ErrorResponse {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ServiceError::from(AuthError::Rejected(403)).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::InvalidInput("compid".to_string()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::from(StoreError::Database("boom".to_string())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::Timeout(Duration::from_secs(30)).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_detail_is_message_text() {
        let err = ServiceError::from(AuthError::Rejected(403));
        assert_eq!(err.to_string(), "Authorization Failed status_code=403");

        let err = ServiceError::from(StoreError::Transient("connection reset".to_string()));
        assert_eq!(err.to_string(), "Database connection error: connection reset");
    }
}
