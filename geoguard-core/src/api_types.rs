//! Request schemas and their validation into parsed, typed forms.
//!
//! Field aliases accept the camelCase payloads sent by the browser client
//! (`punchNumber`, `scanData`, `batchNumber`, ...).

use serde::Deserialize;

use crate::batch::{BatchKey, pairing::ImagePayload};
use crate::error::ValidationError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    #[serde(default, alias = "operator_id", alias = "punchNumber")]
    pub operator_id: Option<String>,
    #[serde(default, alias = "code_value", alias = "scanData")]
    pub code_value: Option<String>,
    #[serde(default, alias = "captured_at", alias = "timestamp")]
    pub captured_at: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedScan {
    /// Trimmed operator id; may be empty, which the validator rejects.
    pub operator_id: String,
    pub code_value: String,
    pub captured_at: Option<String>,
    pub image: Option<ImagePayload>,
}

impl ScanRequest {
    pub fn validate(self) -> Result<ParsedScan, ValidationError> {
        let operator_id = self
            .operator_id
            .map(|raw| raw.trim().to_string())
            .unwrap_or_default();
        let code_value = required_text(self.code_value, "codeValue")?;
        let image = optional_image(self.image)?;

        Ok(ParsedScan {
            operator_id,
            code_value,
            captured_at: non_blank(self.captured_at),
            image,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    #[serde(default, alias = "operator_id", alias = "punchNumber")]
    pub operator_id: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedCapture {
    pub operator_id: String,
    pub image: ImagePayload,
}

impl CaptureRequest {
    pub fn validate(self) -> Result<ParsedCapture, ValidationError> {
        let operator_id = self
            .operator_id
            .map(|raw| raw.trim().to_string())
            .unwrap_or_default();
        let image = self
            .image
            .ok_or(ValidationError::MissingField("image"))
            .and_then(|raw| ImagePayload::from_data_url(&raw))?;

        Ok(ParsedCapture { operator_id, image })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    #[serde(
        default,
        alias = "batchNumber",
        alias = "punchNumber",
        alias = "batch_key"
    )]
    pub key: Option<String>,
    #[serde(default, alias = "operator_name")]
    pub operator_name: Option<String>,
    #[serde(default)]
    pub scans: Vec<FinalizeScanInput>,
    #[serde(default, alias = "first_scan_time", alias = "startScan")]
    pub first_scan_time: Option<String>,
    #[serde(default, alias = "last_scan_time", alias = "endScan")]
    pub last_scan_time: Option<String>,
}

/// A scan as held by the client: either just the code, or the full record.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FinalizeScanInput {
    Code(String),
    Detailed(DetailedScanInput),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedScanInput {
    #[serde(default, alias = "sequence_number")]
    pub sequence_number: Option<u32>,
    #[serde(default, alias = "code_value", alias = "scanData", alias = "code")]
    pub code_value: Option<String>,
    #[serde(default, alias = "captured_at", alias = "timestamp")]
    pub captured_at: Option<String>,
    #[serde(default, alias = "epoch_millis")]
    pub epoch_millis: Option<i64>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedFinalizeScan {
    pub code_value: String,
    pub captured_at: String,
    pub epoch_millis: Option<i64>,
    pub image: Option<ImagePayload>,
}

#[derive(Debug, Clone)]
pub struct ParsedFinalize {
    pub key: BatchKey,
    pub operator_name: Option<String>,
    /// Client-held scans in sequence order; empty when the server-side batch
    /// is authoritative.
    pub scans: Vec<ParsedFinalizeScan>,
    pub first_scan_time: Option<String>,
    pub last_scan_time: Option<String>,
}

impl ParsedFinalize {
    /// Finalize request that relies entirely on the server-side batch.
    pub fn for_key(key: BatchKey) -> Self {
        Self {
            key,
            operator_name: None,
            scans: Vec::new(),
            first_scan_time: None,
            last_scan_time: None,
        }
    }
}

impl FinalizeRequest {
    pub fn validate(self) -> Result<ParsedFinalize, ValidationError> {
        let key = self
            .key
            .ok_or(ValidationError::MissingField("key"))
            .and_then(BatchKey::new)?;

        let scans = order_scans(self.scans)?;

        Ok(ParsedFinalize {
            key,
            operator_name: non_blank(self.operator_name),
            scans,
            first_scan_time: non_blank(self.first_scan_time),
            last_scan_time: non_blank(self.last_scan_time),
        })
    }
}

/// Latest accepted client instant, 9999-12-31T23:59:59.999Z.
pub const MAX_EPOCH_MILLIS: i64 = 253_402_300_799_999;

fn checked_epoch(
    epoch_millis: Option<i64>,
) -> Result<Option<i64>, ValidationError> {
    match epoch_millis {
        Some(millis) if !(0..=MAX_EPOCH_MILLIS).contains(&millis) => {
            Err(ValidationError::InvalidField {
                field: "scans",
                reason: format!("epochMillis {millis} is out of range"),
            })
        }
        other => Ok(other),
    }
}

/// Puts client scans into sequence order. Either every scan carries a
/// sequence number (1..=n, any order) or none does and list order is used.
fn order_scans(
    inputs: Vec<FinalizeScanInput>,
) -> Result<Vec<ParsedFinalizeScan>, ValidationError> {
    let mut numbered = Vec::with_capacity(inputs.len());
    let mut unnumbered = 0usize;

    for input in inputs {
        let (sequence, parsed) = match input {
            FinalizeScanInput::Code(code) => (
                None,
                ParsedFinalizeScan {
                    code_value: required_text(Some(code), "scans")?,
                    captured_at: String::new(),
                    epoch_millis: None,
                    image: None,
                },
            ),
            FinalizeScanInput::Detailed(detail) => (
                detail.sequence_number,
                ParsedFinalizeScan {
                    code_value: required_text(detail.code_value, "scans")?,
                    captured_at: non_blank(detail.captured_at)
                        .unwrap_or_default(),
                    epoch_millis: checked_epoch(detail.epoch_millis)?,
                    image: optional_image(detail.image)?,
                },
            ),
        };
        if sequence.is_none() {
            unnumbered += 1;
        }
        numbered.push((sequence, parsed));
    }

    if unnumbered == numbered.len() {
        return Ok(numbered.into_iter().map(|(_, scan)| scan).collect());
    }
    if unnumbered > 0 {
        return Err(ValidationError::InvalidField {
            field: "scans",
            reason: "sequence numbers must be given for all scans or none"
                .into(),
        });
    }

    numbered.sort_by_key(|(sequence, _)| *sequence);
    for (index, (sequence, _)) in numbered.iter().enumerate() {
        if *sequence != Some(index as u32 + 1) {
            return Err(ValidationError::InvalidField {
                field: "scans",
                reason: "sequence numbers must run contiguously from 1"
                    .into(),
            });
        }
    }

    Ok(numbered.into_iter().map(|(_, scan)| scan).collect())
}

fn required_text(
    value: Option<String>,
    field: &'static str,
) -> Result<String, ValidationError> {
    non_blank(value).ok_or(ValidationError::MissingField(field))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
}

fn optional_image(
    raw: Option<String>,
) -> Result<Option<ImagePayload>, ValidationError> {
    match non_blank(raw) {
        Some(raw) => ImagePayload::from_data_url(&raw).map(Some),
        None => Ok(None),
    }
}
