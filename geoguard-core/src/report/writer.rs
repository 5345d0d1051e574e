use std::path::PathBuf;

use async_trait::async_trait;
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use tracing::debug;

use super::builder::{Report, ReportCell, ReportColumn, ReportRow};
use crate::cleanup::ArtifactScope;
use crate::error::FinalizeError;

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// A report serialised to disk inside an artifact scope.
#[derive(Clone)]
pub struct RenderedReport {
    pub path: PathBuf,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for RenderedReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedReport")
            .field("path", &self.path)
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Serialises a built report into a file inside an artifact scope.
#[async_trait]
pub trait ReportWriter: Send + Sync {
    async fn write(
        &self,
        report: &Report,
        scope: &ArtifactScope,
    ) -> Result<RenderedReport, FinalizeError>;
}

/// Single-sheet XLSX output.
#[derive(Debug, Default, Clone, Copy)]
pub struct XlsxReportWriter;

#[async_trait]
impl ReportWriter for XlsxReportWriter {
    async fn write(
        &self,
        report: &Report,
        scope: &ArtifactScope,
    ) -> Result<RenderedReport, FinalizeError> {
        write_xlsx(report, scope).await
    }
}

/// Writes the report as a single-sheet workbook on a blocking thread.
pub async fn write_xlsx(
    report: &Report,
    scope: &ArtifactScope,
) -> Result<RenderedReport, FinalizeError> {
    let path = scope.path().join(&report.file_name);
    let title = report.title;
    let columns = report.columns;
    let rows = report.rows.clone();

    let target = path.clone();
    let bytes = tokio::task::spawn_blocking(move || {
        render(title, columns, &rows, &target)
            .map_err(|err| format!("cannot render workbook: {err}"))?;
        std::fs::read(&target)
            .map_err(|err| format!("cannot read rendered workbook: {err}"))
    })
    .await
    .map_err(|err| {
        FinalizeError::Generation(format!("report writer task failed: {err}"))
    })?
    .map_err(FinalizeError::Generation)?;

    debug!(
        path = %path.display(),
        bytes = bytes.len(),
        rows = report.rows.len(),
        "report written"
    );

    Ok(RenderedReport {
        path,
        file_name: report.file_name.clone(),
        bytes,
    })
}

fn render(
    title: &str,
    columns: &[ReportColumn],
    rows: &[ReportRow],
    target: &std::path::Path,
) -> Result<(), XlsxError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    let sheet = workbook.add_worksheet();
    sheet.set_name(title)?;

    for (col, column) in columns.iter().enumerate() {
        let col = col as u16;
        sheet.set_column_width(col, column.width)?;
        sheet.write_string_with_format(0, col, column.header, &header)?;
    }

    for (index, row) in rows.iter().enumerate() {
        let row_num = index as u32 + 1;
        for (col, cell) in row.cells().into_iter().enumerate() {
            let col = col as u16;
            match cell {
                ReportCell::Text(text) => {
                    sheet.write_string(row_num, col, text)?;
                }
                ReportCell::Number(value) => {
                    sheet.write_number(row_num, col, value)?;
                }
            }
        }
    }

    workbook.save(target)
}
