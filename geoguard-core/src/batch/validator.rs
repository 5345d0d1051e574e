use std::{collections::HashMap, fmt, sync::Arc};

use super::{Batch, BatchState};
use crate::error::ScanRejection;

/// Known-operator lookup consulted before any scan is accepted.
pub trait OperatorRegistry: Send + Sync + fmt::Debug {
    fn is_known(&self, operator_id: &str) -> bool;

    fn display_name(&self, _operator_id: &str) -> Option<String> {
        None
    }
}

/// Accepts any non-empty operator id.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenRegistry;

impl OperatorRegistry for OpenRegistry {
    fn is_known(&self, operator_id: &str) -> bool {
        !operator_id.trim().is_empty()
    }
}

/// Fixed allow-list of operators with optional display names.
#[derive(Debug, Default, Clone)]
pub struct StaticRegistry {
    operators: HashMap<String, Option<String>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operator(
        mut self,
        operator_id: impl Into<String>,
        display_name: Option<String>,
    ) -> Self {
        self.operators.insert(operator_id.into(), display_name);
        self
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Option<String>)>,
    {
        Self {
            operators: entries.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

impl OperatorRegistry for StaticRegistry {
    fn is_known(&self, operator_id: &str) -> bool {
        self.operators.contains_key(operator_id)
    }

    fn display_name(&self, operator_id: &str) -> Option<String> {
        self.operators.get(operator_id).cloned().flatten()
    }
}

/// Gatekeeper for incoming scans. Pure: never touches batch state.
#[derive(Debug, Clone)]
pub struct ScanValidator {
    registry: Arc<dyn OperatorRegistry>,
    capacity: u32,
}

impl ScanValidator {
    pub fn new(registry: Arc<dyn OperatorRegistry>, capacity: u32) -> Self {
        Self { registry, capacity }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn registry(&self) -> &Arc<dyn OperatorRegistry> {
        &self.registry
    }

    pub fn check_operator(&self, operator_id: &str) -> Result<(), ScanRejection> {
        if operator_id.trim().is_empty() || !self.registry.is_known(operator_id)
        {
            return Err(ScanRejection::InvalidOperator(operator_id.to_string()));
        }
        Ok(())
    }

    /// Checks operator, capacity, and uniqueness in that order.
    pub fn validate(
        &self,
        batch: Option<&Batch>,
        operator_id: &str,
        code_value: &str,
    ) -> Result<(), ScanRejection> {
        self.check_operator(operator_id)?;

        let Some(batch) = batch else {
            return Ok(());
        };

        if batch.state == BatchState::Finalizing {
            return Err(ScanRejection::AlreadyProcessing {
                key: batch.key.to_string(),
            });
        }

        if batch.is_full() || batch.state == BatchState::Failed {
            return Err(ScanRejection::BatchFull {
                key: batch.key.to_string(),
                capacity: batch.capacity,
            });
        }

        if batch.contains_code(code_value) {
            return Err(ScanRejection::DuplicateScan {
                key: batch.key.to_string(),
                code: code_value.to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchKey, NewScan};
    use crate::error::ErrorCode;

    fn batch_with(codes: &[&str], capacity: u32) -> Batch {
        let mut batch = Batch::new(BatchKey::new("42").unwrap(), capacity);
        for code in codes {
            batch.push(NewScan {
                operator_id: "42".into(),
                code_value: (*code).into(),
                captured_at: String::new(),
                epoch_millis: Some(0),
                image: None,
            });
        }
        batch
    }

    fn open_validator(capacity: u32) -> ScanValidator {
        ScanValidator::new(Arc::new(OpenRegistry), capacity)
    }

    #[test]
    fn empty_operator_is_invalid() {
        let err = open_validator(3).validate(None, "  ", "A").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidOperator);
    }

    #[test]
    fn unknown_operator_is_invalid_with_static_registry() {
        let registry = StaticRegistry::new().with_operator("42", None);
        let validator = ScanValidator::new(Arc::new(registry), 3);

        assert!(validator.validate(None, "42", "A").is_ok());
        let err = validator.validate(None, "7", "A").unwrap_err();
        assert_eq!(err, ScanRejection::InvalidOperator("7".into()));
    }

    #[test]
    fn full_batch_rejects_before_duplicate_check() {
        let batch = batch_with(&["A", "B"], 2);
        let err = open_validator(2)
            .validate(Some(&batch), "42", "A")
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BatchFull);
    }

    #[test]
    fn duplicate_code_is_rejected_case_sensitively() {
        let batch = batch_with(&["abc"], 3);
        let validator = open_validator(3);

        let err = validator.validate(Some(&batch), "42", "abc").unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateScan);
        assert!(validator.validate(Some(&batch), "42", "ABC").is_ok());
    }

    #[test]
    fn finalizing_batch_reports_already_processing() {
        let mut batch = batch_with(&["A"], 1);
        batch.state = BatchState::Finalizing;

        let err = open_validator(1)
            .validate(Some(&batch), "42", "Z")
            .unwrap_err();
        assert!(matches!(err, ScanRejection::AlreadyProcessing { .. }));
        assert_eq!(err.code(), ErrorCode::BatchFull);
    }
}
