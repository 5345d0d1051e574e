use serde::Serialize;
use uuid::Uuid;

use super::duration::batch_duration;
use crate::batch::Batch;

pub const SHEET_TITLE: &str = "Scan Data";

/// Spreadsheet cells hold at most 32,767 characters; anything longer than
/// this bound is replaced rather than truncated.
pub const CELL_CHAR_LIMIT: usize = 32_000;
pub const OVERSIZE_PLACEHOLDER: &str = "[content exceeds cell limit]";
pub const NO_IMAGE: &str = "No Image";

/// Longest key fragment placed in a file name. Longer keys are cut and
/// suffixed with a hash of the full key so distinct keys stay distinct.
pub const FILE_KEY_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportColumn {
    pub header: &'static str,
    pub width: u16,
}

pub const COLUMNS: [ReportColumn; 9] = [
    ReportColumn { header: "Batch Number", width: 15 },
    ReportColumn { header: "Operator Name", width: 20 },
    ReportColumn { header: "Sequence", width: 10 },
    ReportColumn { header: "Scan Code", width: 28 },
    ReportColumn { header: "Captured At", width: 22 },
    ReportColumn { header: "First Scan", width: 22 },
    ReportColumn { header: "Last Scan", width: 22 },
    ReportColumn { header: "Total Duration", width: 14 },
    ReportColumn { header: "Image", width: 30 },
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReportCell {
    Text(String),
    Number(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub batch_number: String,
    pub operator_name: String,
    pub sequence: u32,
    pub scan_code: String,
    pub captured_at: String,
    pub first_scan: String,
    pub last_scan: String,
    pub total_duration: String,
    pub image: String,
}

impl ReportRow {
    /// Cells in [`COLUMNS`] order.
    pub fn cells(&self) -> [ReportCell; 9] {
        [
            ReportCell::Text(self.batch_number.clone()),
            ReportCell::Text(self.operator_name.clone()),
            ReportCell::Number(f64::from(self.sequence)),
            ReportCell::Text(self.scan_code.clone()),
            ReportCell::Text(self.captured_at.clone()),
            ReportCell::Text(self.first_scan.clone()),
            ReportCell::Text(self.last_scan.clone()),
            ReportCell::Text(self.total_duration.clone()),
            ReportCell::Text(self.image.clone()),
        ]
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ReportAttachment {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for ReportAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportAttachment")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub key: String,
    pub title: &'static str,
    pub file_name: String,
    pub columns: &'static [ReportColumn],
    pub rows: Vec<ReportRow>,
    pub attachments: Vec<ReportAttachment>,
    pub operator_name: String,
    pub duration: String,
}

impl Report {
    pub fn scan_count(&self) -> usize {
        self.rows.len()
    }
}

/// Caller-supplied context that is not part of the stored batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportContext {
    pub operator_name: Option<String>,
    pub first_scan_time: Option<String>,
    pub last_scan_time: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportBuilder;

impl ReportBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Lays out one row per scan. Pure: performs no I/O.
    pub fn build(&self, batch: &Batch, context: &ReportContext) -> Report {
        let key = batch.key.as_str();
        let file_key = file_safe(key);

        let operator_name = context
            .operator_name
            .clone()
            .or_else(|| batch.operator_name.clone())
            .unwrap_or_default();
        let first_scan = context.first_scan_time.clone().unwrap_or_else(|| {
            batch
                .scans
                .first()
                .map(|scan| scan.captured_at.clone())
                .unwrap_or_default()
        });
        let last_scan = context.last_scan_time.clone().unwrap_or_else(|| {
            batch
                .scans
                .last()
                .map(|scan| scan.captured_at.clone())
                .unwrap_or_default()
        });
        let total_duration = batch_duration(&batch.scans);

        let mut rows = Vec::with_capacity(batch.scans.len());
        let mut attachments = Vec::new();

        for scan in &batch.scans {
            let image = match &scan.image {
                Some(payload) => {
                    let label =
                        format!("Batch_{file_key}_Scan_{}", scan.sequence_number);
                    attachments.push(ReportAttachment {
                        file_name: format!("{label}.{}", payload.extension()),
                        content_type: payload.content_type.clone(),
                        data: payload.data.clone(),
                    });
                    label
                }
                None => NO_IMAGE.to_string(),
            };

            rows.push(ReportRow {
                batch_number: bounded_cell(key),
                operator_name: bounded_cell(&operator_name),
                sequence: scan.sequence_number,
                scan_code: bounded_cell(&scan.code_value),
                captured_at: bounded_cell(&scan.captured_at),
                first_scan: bounded_cell(&first_scan),
                last_scan: bounded_cell(&last_scan),
                total_duration: total_duration.clone(),
                image,
            });
        }

        Report {
            key: key.to_string(),
            title: SHEET_TITLE,
            file_name: format!("Batch_{file_key}.xlsx"),
            columns: &COLUMNS,
            rows,
            attachments,
            operator_name,
            duration: total_duration,
        }
    }
}

/// Replaces text longer than [`CELL_CHAR_LIMIT`] characters with a
/// placeholder.
pub fn bounded_cell(value: &str) -> String {
    if value.chars().count() > CELL_CHAR_LIMIT {
        OVERSIZE_PLACEHOLDER.to_string()
    } else {
        value.to_string()
    }
}

fn file_safe(key: &str) -> String {
    let safe: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.len() <= FILE_KEY_LIMIT {
        return safe;
    }

    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
        .simple()
        .to_string();
    format!("{}-{}", &safe[..FILE_KEY_LIMIT - 16], &digest[..8])
}
