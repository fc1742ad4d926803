// CSV implementation of the `ReportWriter` port. Tables are built as
// strings and written via temp-file-then-rename, so a run that dies mid
// write leaves either the previous artifact or none - never a half table.

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::pipeline::{ReportWriter, RunLogEntry, WriteError, WrittenReports};
use crate::core::structuring::{InvoiceHeader, LineItem};

pub struct CsvReportWriter {
    output_dir: PathBuf,
    /// Stamp embedded in the artifact filenames, normally the run start
    /// time as `%Y%m%d_%H%M%S`.
    stamp: String,
}

impl CsvReportWriter {
    pub fn new(output_dir: impl Into<PathBuf>, stamp: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            stamp: stamp.into(),
        }
    }

    fn artifact_path(&self, prefix: &str) -> PathBuf {
        self.output_dir.join(format!("{prefix}_{}.csv", self.stamp))
    }
}

#[async_trait]
impl ReportWriter for CsvReportWriter {
    async fn write_reports(
        &self,
        headers: &[InvoiceHeader],
        line_items: &[LineItem],
        run_log: &[RunLogEntry],
    ) -> Result<WrittenReports, WriteError> {
        fs::create_dir_all(&self.output_dir).map_err(|e| WriteError::Io {
            path: self.output_dir.display().to_string(),
            source: e,
        })?;

        let headers_path = self.artifact_path("invoice_headers");
        let line_items_path = self.artifact_path("invoice_line_items");
        let run_log_path = self.artifact_path("run_log");

        write_atomic(&headers_path, &build_headers_csv(headers))?;
        write_atomic(&line_items_path, &build_line_items_csv(line_items))?;
        write_atomic(&run_log_path, &build_run_log_csv(run_log))?;

        tracing::info!(
            headers = headers.len(),
            line_items = line_items.len(),
            log_entries = run_log.len(),
            output_dir = %self.output_dir.display(),
            "Run reports written"
        );

        Ok(WrittenReports {
            headers_path,
            line_items_path,
            run_log_path,
        })
    }
}

// ============================================================================
// TABLE BUILDING
// ============================================================================

pub fn build_headers_csv(headers: &[InvoiceHeader]) -> String {
    let mut lines = Vec::with_capacity(headers.len() + 1);
    lines.push(
        "file_id,file_name,vendor,invoice_number,invoice_date,due_date,currency,\
         net_amount,tax_amount,total_amount,payment_terms"
            .to_string(),
    );

    for header in headers {
        lines.push(
            [
                csv_escape(&header.file_id),
                csv_escape(&header.file_name),
                csv_escape(&header.vendor),
                csv_escape(&header.invoice_number),
                csv_escape(header.invoice_date.as_deref().unwrap_or("")),
                csv_escape(header.due_date.as_deref().unwrap_or("")),
                csv_escape(header.currency.as_deref().unwrap_or("")),
                format_amount(header.net_amount),
                format_amount(header.tax_amount),
                format_amount(Some(header.total_amount)),
                csv_escape(header.payment_terms.as_deref().unwrap_or("")),
            ]
            .join(","),
        );
    }

    finish(lines)
}

pub fn build_line_items_csv(line_items: &[LineItem]) -> String {
    let mut lines = Vec::with_capacity(line_items.len() + 1);
    lines.push("file_id,description,quantity,unit_price,line_total".to_string());

    for item in line_items {
        lines.push(
            [
                csv_escape(&item.file_id),
                csv_escape(&item.description),
                format_amount(item.quantity),
                format_amount(item.unit_price),
                format_amount(item.line_total),
            ]
            .join(","),
        );
    }

    finish(lines)
}

pub fn build_run_log_csv(run_log: &[RunLogEntry]) -> String {
    let mut lines = Vec::with_capacity(run_log.len() + 1);
    lines.push("timestamp,file_id,file_name,outcome,detail".to_string());

    for entry in run_log {
        lines.push(
            [
                entry.timestamp.to_rfc3339(),
                csv_escape(&entry.file_id),
                csv_escape(&entry.file_name),
                entry.outcome.as_str().to_string(),
                csv_escape(&entry.detail),
            ]
            .join(","),
        );
    }

    finish(lines)
}

fn finish(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn format_amount(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.2}"),
        None => String::new(),
    }
}

/// Quotes a field when it contains a separator, quote or newline; embedded
/// quotes are doubled per RFC 4180.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// ============================================================================
// ATOMIC WRITE
// ============================================================================

fn write_atomic(path: &Path, content: &str) -> Result<(), WriteError> {
    let tmp_path = path.with_extension("csv.tmp");

    fs::write(&tmp_path, content).map_err(|e| WriteError::Io {
        path: tmp_path.display().to_string(),
        source: e,
    })?;

    fs::rename(&tmp_path, path).map_err(|e| WriteError::Io {
        path: path.display().to_string(),
        source: e,
    })
}
