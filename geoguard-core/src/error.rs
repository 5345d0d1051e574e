use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable reason attached to every failed request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    InvalidOperator,
    DuplicateScan,
    BatchFull,
    ConfigError,
    GenerationFailed,
    DeliveryFailed,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::InvalidOperator => "INVALID_OPERATOR",
            ErrorCode::DuplicateScan => "DUPLICATE_SCAN",
            ErrorCode::BatchFull => "BATCH_FULL",
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::GenerationFailed => "GENERATION_FAILED",
            ErrorCode::DeliveryFailed => "DELIVERY_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Malformed or missing request fields. Never mutates state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("batch store unavailable: {0}")]
    Unavailable(String),
}

/// Reasons an incoming scan is turned away. Batch state is untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanRejection {
    #[error("operator '{0}' is not recognised")]
    InvalidOperator(String),
    #[error("batch {key} is full ({capacity}/{capacity})")]
    BatchFull { key: String, capacity: u32 },
    #[error("batch {key} is already being finalized")]
    AlreadyProcessing { key: String },
    #[error("code '{code}' was already scanned in batch {key}")]
    DuplicateScan { key: String, code: String },
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ScanRejection {
    pub fn code(&self) -> ErrorCode {
        match self {
            ScanRejection::InvalidOperator(_) => ErrorCode::InvalidOperator,
            ScanRejection::BatchFull { .. }
            | ScanRejection::AlreadyProcessing { .. } => ErrorCode::BatchFull,
            ScanRejection::DuplicateScan { .. } => ErrorCode::DuplicateScan,
            ScanRejection::Invalid(_) => ErrorCode::InvalidInput,
            ScanRejection::Store(_) => ErrorCode::InternalError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FinalizeError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("no batch recorded for {key} and no scans supplied")]
    NotFound { key: String },
    #[error("batch {key} has {count} of {capacity} scans")]
    Incomplete { key: String, count: usize, capacity: u32 },
    #[error("scan list does not match batch {key}: {reason}")]
    ScanMismatch { key: String, reason: String },
    #[error("batch {key} is already being finalized")]
    AlreadyProcessing { key: String },
    #[error(transparent)]
    Rejected(#[from] ScanRejection),
    #[error("mail delivery is not configured: {0}")]
    Config(String),
    #[error("report generation failed: {0}")]
    Generation(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl FinalizeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            FinalizeError::Invalid(_)
            | FinalizeError::NotFound { .. }
            | FinalizeError::Incomplete { .. }
            | FinalizeError::ScanMismatch { .. } => ErrorCode::InvalidInput,
            FinalizeError::AlreadyProcessing { .. } => ErrorCode::BatchFull,
            FinalizeError::Rejected(rejection) => rejection.code(),
            FinalizeError::Config(_) => ErrorCode::ConfigError,
            FinalizeError::Generation(_) => ErrorCode::GenerationFailed,
            FinalizeError::Delivery(_) => ErrorCode::DeliveryFailed,
            FinalizeError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the failure happened after the batch entered `Finalizing`.
    pub fn is_pipeline_failure(&self) -> bool {
        matches!(
            self,
            FinalizeError::Config(_)
                | FinalizeError::Generation(_)
                | FinalizeError::Delivery(_)
                | FinalizeError::Internal(_)
        )
    }
}

impl From<StoreError> for FinalizeError {
    fn from(err: StoreError) -> Self {
        FinalizeError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_as_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::DuplicateScan).unwrap();
        assert_eq!(json, "\"DUPLICATE_SCAN\"");
        assert_eq!(ErrorCode::ConfigError.to_string(), "CONFIG_ERROR");
    }

    #[test]
    fn already_processing_reports_batch_full() {
        let err = FinalizeError::AlreadyProcessing { key: "42".into() };
        assert_eq!(err.code(), ErrorCode::BatchFull);
        assert!(!err.is_pipeline_failure());
    }
}
