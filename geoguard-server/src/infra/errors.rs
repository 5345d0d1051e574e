use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use geoguard_core::{
    ErrorCode, FinalizeError, ScanRejection, StoreError, ValidationError,
};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: status_for(code),
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }
}

/// HTTP status carried by each error code.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorCode::InvalidOperator => StatusCode::FORBIDDEN,
        ErrorCode::DuplicateScan | ErrorCode::BatchFull => StatusCode::CONFLICT,
        ErrorCode::DeliveryFailed => StatusCode::BAD_GATEWAY,
        ErrorCode::ConfigError
        | ErrorCode::GenerationFailed
        | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<ScanRejection> for AppError {
    fn from(err: ScanRejection) -> Self {
        if let ScanRejection::Store(store) = &err {
            tracing::error!(error = %store, "batch store operation failed");
        }
        Self::new(err.code(), err.to_string())
    }
}

impl From<FinalizeError> for AppError {
    fn from(err: FinalizeError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "batch store operation failed");
        Self::internal("Batch store unavailable")
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_statuses() {
        assert_eq!(status_for(ErrorCode::InvalidInput), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorCode::InvalidOperator), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorCode::DuplicateScan), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorCode::BatchFull), StatusCode::CONFLICT);
        assert_eq!(
            status_for(ErrorCode::ConfigError),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(ErrorCode::DeliveryFailed),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn duplicate_rejection_becomes_conflict() {
        let err = AppError::from(ScanRejection::DuplicateScan {
            key: "42".into(),
            code: "ABC".into(),
        });
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, ErrorCode::DuplicateScan);
        assert!(err.message.contains("ABC"));
    }

    #[test]
    fn store_errors_do_not_leak_details() {
        let err = AppError::from(StoreError::Unavailable("disk on fire".into()));
        assert_eq!(err.code, ErrorCode::InternalError);
        assert!(!err.message.contains("disk"));
    }
}
