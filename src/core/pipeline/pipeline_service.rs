// The pipeline orchestrator. One run = list the folder, then for every PDF:
// download -> OCR -> structure, accumulating records on success and run-log
// entries always. A per-file failure skips that file and never aborts the
// batch; only listing (after retry exhaustion) and report writing are fatal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::core::documents::{DocumentStore, DocumentStoreError, FileDescriptor};
use crate::core::extraction::TextExtractor;
use crate::core::structuring::{
    InvoiceHeader, LanguageModelProvider, LineItem, StructuringService,
};

// ============================================================================
// RUN STATE
// ============================================================================

/// Where a run currently is. `Failed` is reachable from `ListingFiles` and
/// `WritingOutputs` only; per-file errors keep the run in `ProcessingFile`
/// and advance to the next file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    ListingFiles,
    ProcessingFile(usize),
    WritingOutputs,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Init => write!(f, "init"),
            RunState::ListingFiles => write!(f, "listing_files"),
            RunState::ProcessingFile(i) => write!(f, "processing_file({i})"),
            RunState::WritingOutputs => write!(f, "writing_outputs"),
            RunState::Done => write!(f, "done"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

// ============================================================================
// RUN LOG
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Success,
    DownloadFailed,
    OcrFailed,
    StructuringFailed,
}

impl FileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileOutcome::Success => "success",
            FileOutcome::DownloadFailed => "download_failed",
            FileOutcome::OcrFailed => "ocr_failed",
            FileOutcome::StructuringFailed => "structuring_failed",
        }
    }
}

/// One per-file line in the run log. Carries enough context (file identity,
/// outcome, provider message) to diagnose a skip without re-running.
#[derive(Debug, Clone)]
pub struct RunLogEntry {
    pub timestamp: DateTime<Utc>,
    pub file_id: String,
    pub file_name: String,
    pub outcome: FileOutcome,
    pub detail: String,
}

// ============================================================================
// REPORT WRITER (PORT)
// ============================================================================

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to write '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Paths of the artifacts one run produced.
#[derive(Debug, Clone, Default)]
pub struct WrittenReports {
    pub headers_path: PathBuf,
    pub line_items_path: PathBuf,
    pub run_log_path: PathBuf,
}

/// Materializes the accumulated record sets plus the run log. Writes must be
/// atomic per file: a failed run leaves either the complete table or nothing.
#[async_trait]
pub trait ReportWriter: Send + Sync {
    async fn write_reports(
        &self,
        headers: &[InvoiceHeader],
        line_items: &[LineItem],
        run_log: &[RunLogEntry],
    ) -> Result<WrittenReports, WriteError>;
}

// ============================================================================
// ERRORS
// ============================================================================

/// Fatal pipeline failures. Everything else is a per-file skip.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("listing documents failed after {attempts} attempts: {source}")]
    Listing {
        attempts: u32,
        #[source]
        source: DocumentStoreError,
    },

    #[error(transparent)]
    Write(#[from] WriteError),
}

// ============================================================================
// OPTIONS & SUMMARY
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Attempts for the (idempotent) folder listing before giving up.
    pub list_attempts: u32,
    /// Initial backoff between listing attempts; doubles each retry.
    pub list_backoff: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            list_attempts: 3,
            list_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub files_listed: usize,
    pub files_succeeded: usize,
    pub files_skipped: usize,
    pub total_cost_usd: f64,
    pub reports: WrittenReports,
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline<S, X, P, W>
where
    S: DocumentStore,
    X: TextExtractor,
    P: LanguageModelProvider,
    W: ReportWriter,
{
    store: S,
    extractor: X,
    structurer: StructuringService<P>,
    writer: W,
    options: PipelineOptions,
}

impl<S, X, P, W> Pipeline<S, X, P, W>
where
    S: DocumentStore,
    X: TextExtractor,
    P: LanguageModelProvider,
    W: ReportWriter,
{
    pub fn new(
        store: S,
        extractor: X,
        structurer: StructuringService<P>,
        writer: W,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            extractor,
            structurer,
            writer,
            options,
        }
    }

    /// Executes one full run over `folder_id`.
    pub async fn run(&self, folder_id: &str) -> Result<RunSummary, PipelineError> {
        let started = std::time::Instant::now();
        let mut state = RunState::Init;
        tracing::debug!(%state, "Run starting");

        state = RunState::ListingFiles;
        tracing::debug!(%state, "Listing folder");
        let files = match self.list_with_retry(folder_id).await {
            Ok(files) => files,
            Err(err) => {
                state = RunState::Failed;
                tracing::error!(%state, error = %err, "Listing failed");
                return Err(err);
            }
        };
        tracing::info!(folder_id, files = files.len(), "Folder listed");

        let mut headers: Vec<InvoiceHeader> = Vec::new();
        let mut line_items: Vec<LineItem> = Vec::new();
        let mut run_log: Vec<RunLogEntry> = Vec::new();
        let mut total_cost_usd = 0.0;

        for (index, file) in files.iter().enumerate() {
            state = RunState::ProcessingFile(index);
            tracing::debug!(%state, file_id = %file.id, file_name = %file.name, "Processing file");

            match self.process_file(file).await {
                Ok((header, items, cost_usd)) => {
                    headers.push(header);
                    line_items.extend(items);
                    total_cost_usd += cost_usd;
                    run_log.push(log_entry(file, FileOutcome::Success, String::new()));
                }
                Err((outcome, detail)) => {
                    tracing::warn!(
                        file_id = %file.id,
                        file_name = %file.name,
                        outcome = outcome.as_str(),
                        detail = %detail,
                        "Skipping file"
                    );
                    run_log.push(log_entry(file, outcome, detail));
                }
            }
        }

        state = RunState::WritingOutputs;
        tracing::debug!(%state, "Writing run reports");
        let reports = match self
            .writer
            .write_reports(&headers, &line_items, &run_log)
            .await
        {
            Ok(reports) => reports,
            Err(err) => {
                state = RunState::Failed;
                tracing::error!(%state, error = %err, "Report writing failed");
                return Err(err.into());
            }
        };

        state = RunState::Done;
        let summary = RunSummary {
            files_listed: files.len(),
            files_succeeded: headers.len(),
            files_skipped: files.len() - headers.len(),
            total_cost_usd,
            reports,
        };
        tracing::info!(
            %state,
            files_listed = summary.files_listed,
            files_succeeded = summary.files_succeeded,
            files_skipped = summary.files_skipped,
            total_cost_usd = summary.total_cost_usd,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Run completed"
        );

        Ok(summary)
    }

    /// Listing is idempotent and side-effect free, so it is the one call
    /// that gets a bounded retry with doubling backoff.
    async fn list_with_retry(
        &self,
        folder_id: &str,
    ) -> Result<Vec<FileDescriptor>, PipelineError> {
        let attempts = self.options.list_attempts.max(1);
        let mut backoff = self.options.list_backoff;

        for attempt in 1..=attempts {
            match self.store.list_pdfs(folder_id).await {
                Ok(mut files) => {
                    // Stable order so identical inputs yield identical tables.
                    files.sort_by(|a, b| {
                        (&a.relative_path, &a.name, &a.id).cmp(&(&b.relative_path, &b.name, &b.id))
                    });
                    return Ok(files);
                }
                Err(err) if attempt < attempts => {
                    tracing::warn!(
                        attempt,
                        attempts,
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "Listing attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => {
                    return Err(PipelineError::Listing {
                        attempts,
                        source: err,
                    })
                }
            }
        }
        unreachable!("listing loop returns on the final attempt")
    }

    async fn process_file(
        &self,
        file: &FileDescriptor,
    ) -> Result<(InvoiceHeader, Vec<LineItem>, f64), (FileOutcome, String)> {
        let content = self
            .store
            .download(file)
            .await
            .map_err(|e| (FileOutcome::DownloadFailed, e.to_string()))?;

        let document = self
            .extractor
            .extract(file, &content)
            .await
            .map_err(|e| (FileOutcome::OcrFailed, e.to_string()))?;

        let outcome = self
            .structurer
            .structure(file, &document)
            .await
            .map_err(|e| (FileOutcome::StructuringFailed, e.to_string()))?;

        Ok((
            outcome.invoice.header,
            outcome.invoice.line_items,
            outcome.cost_usd,
        ))
    }
}

fn log_entry(file: &FileDescriptor, outcome: FileOutcome, detail: String) -> RunLogEntry {
    RunLogEntry {
        timestamp: Utc::now(),
        file_id: file.id.clone(),
        file_name: file.name.clone(),
        outcome,
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extraction::{ExtractedDocument, OcrError};
    use crate::core::structuring::{ModelReply, StructuringConfig, StructuringError, StructuringRequest, TokenUsage};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    // ------------------------------------------------------------------
    // In-memory doubles for the ports, in the spirit of the in-memory
    // stores used elsewhere for core tests.
    // ------------------------------------------------------------------

    fn pdf(id: &str, name: &str) -> FileDescriptor {
        FileDescriptor {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: "application/pdf".to_string(),
            relative_path: String::new(),
            modified_time: None,
        }
    }

    struct MockStore {
        files: Vec<FileDescriptor>,
        list_calls: Arc<AtomicU32>,
        /// Fail this many listing attempts before succeeding.
        list_failures: AtomicU32,
        /// Downloads for these file ids always fail.
        download_fail_ids: Vec<String>,
    }

    impl MockStore {
        fn new(files: Vec<FileDescriptor>) -> Self {
            Self {
                files,
                list_calls: Arc::new(AtomicU32::new(0)),
                list_failures: AtomicU32::new(0),
                download_fail_ids: Vec::new(),
            }
        }

        fn failing_first(files: Vec<FileDescriptor>, failures: u32) -> Self {
            let store = Self::new(files);
            store.list_failures.store(failures, Ordering::SeqCst);
            store
        }

        fn failing_downloads(files: Vec<FileDescriptor>, fail_ids: Vec<String>) -> Self {
            let mut store = Self::new(files);
            store.download_fail_ids = fail_ids;
            store
        }
    }

    #[async_trait]
    impl DocumentStore for MockStore {
        async fn list_pdfs(
            &self,
            _folder_id: &str,
        ) -> Result<Vec<FileDescriptor>, DocumentStoreError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.list_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.list_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(DocumentStoreError::Transport("connection reset".into()));
            }
            Ok(self.files.clone())
        }

        async fn download(&self, file: &FileDescriptor) -> Result<Vec<u8>, DocumentStoreError> {
            if self.download_fail_ids.contains(&file.id) {
                return Err(DocumentStoreError::Api {
                    status: 404,
                    message: "file not found".into(),
                });
            }
            Ok(file.id.as_bytes().to_vec())
        }
    }

    /// OCR double that fails for the listed file ids and otherwise echoes a
    /// text mentioning the file.
    struct MockExtractor {
        fail_ids: Vec<String>,
    }

    #[async_trait]
    impl TextExtractor for MockExtractor {
        async fn extract(
            &self,
            file: &FileDescriptor,
            _content: &[u8],
        ) -> Result<ExtractedDocument, OcrError> {
            if self.fail_ids.contains(&file.id) {
                return Err(OcrError::Provider {
                    status: 500,
                    message: "processor exploded".into(),
                });
            }
            Ok(ExtractedDocument {
                text: format!("invoice text for {}", file.id),
                fields: Default::default(),
            })
        }
    }

    /// Deterministic model double: one header and two line items per call.
    struct MockModel;

    #[async_trait]
    impl LanguageModelProvider for MockModel {
        async fn complete_structured(
            &self,
            request: &StructuringRequest,
        ) -> Result<ModelReply, StructuringError> {
            // The file id is embedded in the prompt text by MockExtractor.
            let marker = request
                .user_prompt
                .split("invoice text for ")
                .nth(1)
                .map(|rest| rest.split_whitespace().next().unwrap_or(""))
                .unwrap_or("");
            let content = serde_json::json!({
                "vendor": "ACME",
                "invoice_number": format!("INV-{marker}"),
                "invoice_date": "2024-01-01",
                "due_date": null,
                "currency": "EUR",
                "net_amount": 100.0,
                "tax_amount": 21.0,
                "total_amount": 121.0,
                "payment_terms": null,
                "line_items": [
                    { "description": "item one", "quantity": 1.0, "unit_price": 60.0, "line_total": 60.0 },
                    { "description": "item two", "quantity": 1.0, "unit_price": 61.0, "line_total": 61.0 }
                ]
            })
            .to_string();
            Ok(ModelReply {
                content,
                usage: TokenUsage::default(),
            })
        }
    }

    #[derive(Clone, Default)]
    struct CapturingWriter {
        written: Arc<Mutex<Option<(Vec<InvoiceHeader>, Vec<LineItem>, Vec<RunLogEntry>)>>>,
        fail: bool,
    }

    #[async_trait]
    impl ReportWriter for CapturingWriter {
        async fn write_reports(
            &self,
            headers: &[InvoiceHeader],
            line_items: &[LineItem],
            run_log: &[RunLogEntry],
        ) -> Result<WrittenReports, WriteError> {
            if self.fail {
                return Err(WriteError::Io {
                    path: "/unwritable/headers.csv".into(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            *self.written.lock().unwrap() =
                Some((headers.to_vec(), line_items.to_vec(), run_log.to_vec()));
            Ok(WrittenReports::default())
        }
    }

    fn pipeline(
        store: MockStore,
        extractor: MockExtractor,
        writer: CapturingWriter,
    ) -> Pipeline<MockStore, MockExtractor, MockModel, CapturingWriter> {
        let structurer = StructuringService::new(
            MockModel,
            StructuringConfig {
                model: "gpt-4o-mini".to_string(),
                temperature: 0.2,
                max_tokens: None,
            },
        );
        Pipeline::new(
            store,
            extractor,
            structurer,
            writer,
            PipelineOptions {
                list_attempts: 3,
                list_backoff: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn one_bad_file_does_not_stop_the_batch() {
        // Scenario from the design notes: A and C succeed, B fails OCR.
        let store = MockStore::new(vec![pdf("a", "a.pdf"), pdf("b", "b.pdf"), pdf("c", "c.pdf")]);
        let writer = CapturingWriter::default();
        let pipeline = pipeline(
            store,
            MockExtractor {
                fail_ids: vec!["b".to_string()],
            },
            writer.clone(),
        );

        let summary = pipeline.run("folder").await.unwrap();
        assert_eq!(summary.files_listed, 3);
        assert_eq!(summary.files_succeeded, 2);
        assert_eq!(summary.files_skipped, 1);

        let (headers, line_items, run_log) = writer.written.lock().unwrap().clone().unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(line_items.len(), 4);

        let failures: Vec<_> = run_log
            .iter()
            .filter(|e| e.outcome != FileOutcome::Success)
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].file_id, "b");
        assert_eq!(failures[0].outcome, FileOutcome::OcrFailed);
    }

    #[tokio::test]
    async fn download_failure_skips_the_file_only() {
        let store = MockStore::failing_downloads(
            vec![pdf("a", "a.pdf"), pdf("b", "b.pdf"), pdf("c", "c.pdf")],
            vec!["b".to_string()],
        );
        let writer = CapturingWriter::default();
        let pipeline = pipeline(store, MockExtractor { fail_ids: vec![] }, writer.clone());

        let summary = pipeline.run("folder").await.unwrap();
        assert_eq!(summary.files_succeeded, 2);
        assert_eq!(summary.files_skipped, 1);

        let (headers, line_items, run_log) = writer.written.lock().unwrap().clone().unwrap();
        assert!(headers.iter().all(|h| h.file_id != "b"));
        assert_eq!(headers.len(), 2);
        assert_eq!(line_items.len(), 4);

        let entry = run_log
            .iter()
            .find(|e| e.file_id == "b")
            .expect("run log entry for the skipped file");
        assert_eq!(entry.outcome, FileOutcome::DownloadFailed);
        assert_eq!(entry.outcome.as_str(), "download_failed");
        assert!(entry.detail.contains("404"));
    }

    #[tokio::test]
    async fn no_orphan_line_items() {
        let store = MockStore::new(vec![pdf("a", "a.pdf"), pdf("c", "c.pdf")]);
        let writer = CapturingWriter::default();
        let pipeline = pipeline(store, MockExtractor { fail_ids: vec![] }, writer.clone());

        pipeline.run("folder").await.unwrap();

        let (headers, line_items, _) = writer.written.lock().unwrap().clone().unwrap();
        for item in &line_items {
            assert!(
                headers.iter().any(|h| h.file_id == item.file_id),
                "line item references unknown file id {}",
                item.file_id
            );
        }
    }

    #[tokio::test]
    async fn listing_recovers_from_transient_failures() {
        let store = MockStore::failing_first(vec![pdf("a", "a.pdf")], 2);
        let calls = Arc::clone(&store.list_calls);
        let writer = CapturingWriter::default();
        let pipeline = pipeline(store, MockExtractor { fail_ids: vec![] }, writer);

        let summary = pipeline.run("folder").await.unwrap();
        assert_eq!(summary.files_succeeded, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn listing_exhaustion_is_fatal() {
        let store = MockStore::failing_first(vec![pdf("a", "a.pdf")], 5);
        let writer = CapturingWriter::default();
        let pipeline = pipeline(store, MockExtractor { fail_ids: vec![] }, writer);

        let err = pipeline.run("folder").await.unwrap_err();
        assert!(matches!(err, PipelineError::Listing { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn write_failure_is_fatal() {
        let store = MockStore::new(vec![pdf("a", "a.pdf")]);
        let writer = CapturingWriter {
            fail: true,
            ..Default::default()
        };
        let pipeline = pipeline(store, MockExtractor { fail_ids: vec![] }, writer);

        let err = pipeline.run("folder").await.unwrap_err();
        assert!(matches!(err, PipelineError::Write(_)));
    }

    #[tokio::test]
    async fn credential_failure_means_no_store_calls() {
        // main only builds the pipeline after the credential bundle decodes;
        // a bad bundle therefore never triggers a network call. Mirror that
        // ordering here and assert the store was never touched.
        let store = MockStore::new(vec![pdf("a", "a.pdf")]);
        let calls = Arc::clone(&store.list_calls);

        let bundle =
            crate::core::credentials::CredentialBundle::from_encoded(None, None, None);
        assert!(bundle.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn identical_inputs_produce_identical_tables() {
        let files = vec![pdf("b", "b.pdf"), pdf("a", "a.pdf")];

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let writer = CapturingWriter::default();
            let pipeline = pipeline(
                MockStore::new(files.clone()),
                MockExtractor { fail_ids: vec![] },
                writer.clone(),
            );
            pipeline.run("folder").await.unwrap();
            let (headers, line_items, _) = writer.written.lock().unwrap().clone().unwrap();
            outputs.push((headers, line_items));
        }

        assert_eq!(outputs[0], outputs[1]);
        // Listing order was normalized: "a" sorts before "b".
        assert_eq!(outputs[0].0[0].file_id, "a");
    }
}
