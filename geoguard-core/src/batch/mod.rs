pub mod accumulator;
pub mod pairing;
pub mod store;
pub mod validator;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use pairing::ImagePayload;

/// Longest accepted batch key, in characters.
pub const MAX_KEY_CHARS: usize = 128;

/// Identifier scoping one accumulation sequence (the operator's punch number).
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BatchKey(String);

impl BatchKey {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ValidationError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ValidationError::MissingField("key"));
        }
        if trimmed.chars().count() > MAX_KEY_CHARS {
            return Err(ValidationError::InvalidField {
                field: "key",
                reason: format!("longer than {MAX_KEY_CHARS} characters"),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One accepted scan. Immutable once appended to a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    pub sequence_number: u32,
    pub operator_id: String,
    pub code_value: String,
    /// Display wall-clock string, as captured.
    pub captured_at: String,
    /// Milliseconds since the Unix epoch at acceptance. Absent only for
    /// scans replayed from a client-held list.
    pub epoch_millis: Option<i64>,
    pub image: Option<ImagePayload>,
}

/// Fields for a scan that has passed validation and is about to be appended.
#[derive(Debug, Clone)]
pub struct NewScan {
    pub operator_id: String,
    pub code_value: String,
    pub captured_at: String,
    pub epoch_millis: Option<i64>,
    pub image: Option<ImagePayload>,
}

/// Stored lifecycle state. An absent batch is the conceptual `Empty` state,
/// and a completed batch is deleted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Accumulating,
    Full,
    Finalizing,
    /// Report generation or delivery failed; scans are retained for retry.
    Failed,
}

/// Externally visible phase, including the implicit empty state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Empty,
    Accumulating,
    Full,
    Finalizing,
    Failed,
}

impl From<Option<BatchState>> for BatchPhase {
    fn from(state: Option<BatchState>) -> Self {
        match state {
            None => BatchPhase::Empty,
            Some(BatchState::Accumulating) => BatchPhase::Accumulating,
            Some(BatchState::Full) => BatchPhase::Full,
            Some(BatchState::Finalizing) => BatchPhase::Finalizing,
            Some(BatchState::Failed) => BatchPhase::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub key: BatchKey,
    pub operator_name: Option<String>,
    pub scans: Vec<Scan>,
    pub capacity: u32,
    pub state: BatchState,
    pub first_scan_epoch: Option<i64>,
    pub last_scan_epoch: Option<i64>,
}

impl Batch {
    pub fn new(key: BatchKey, capacity: u32) -> Self {
        Self {
            key,
            operator_name: None,
            scans: Vec::with_capacity(capacity as usize),
            capacity,
            state: BatchState::Accumulating,
            first_scan_epoch: None,
            last_scan_epoch: None,
        }
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.scans.len() >= self.capacity as usize
    }

    pub fn contains_code(&self, code_value: &str) -> bool {
        self.scans.iter().any(|scan| scan.code_value == code_value)
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.scans.iter().map(|scan| scan.code_value.as_str())
    }

    pub fn has_images(&self) -> bool {
        self.scans.iter().any(|scan| scan.image.is_some())
    }

    /// Appends a validated scan, assigning the next sequence number and
    /// moving to `Full` once capacity is reached.
    pub(crate) fn push(&mut self, scan: NewScan) -> &Scan {
        let sequence_number = self.scans.len() as u32 + 1;
        if self.scans.is_empty() {
            self.first_scan_epoch = scan.epoch_millis;
        }
        self.last_scan_epoch = scan.epoch_millis;

        self.scans.push(Scan {
            sequence_number,
            operator_id: scan.operator_id,
            code_value: scan.code_value,
            captured_at: scan.captured_at,
            epoch_millis: scan.epoch_millis,
            image: scan.image,
        });

        self.state = if self.is_full() {
            BatchState::Full
        } else {
            BatchState::Accumulating
        };

        &self.scans[self.scans.len() - 1]
    }
}
