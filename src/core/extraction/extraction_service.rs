// Text-extraction port. OCR is fully delegated to a provider (Document AI
// in production); the core only sees the extracted text plus whatever
// labeled entities the provider already pulled out. Those entity hints get
// forwarded to the language model as preliminary results.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::core::documents::FileDescriptor;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// OCR output for one document.
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    /// Full plain text of the document.
    pub text: String,
    /// Entity hints keyed by entity type (e.g. "supplier_name" ->
    /// "ACME S.L."). BTreeMap so prompt assembly iterates in a stable order.
    pub fields: BTreeMap<String, String>,
}

// ============================================================================
// ERRORS
// ============================================================================

/// OCR failures are per-file: the orchestrator logs them and moves on to the
/// next document rather than aborting the batch.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("transport error talking to the OCR service: {0}")]
    Transport(String),

    #[error("OCR service error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("OCR authentication failed: {0}")]
    Auth(String),

    #[error("OCR returned no text for the document")]
    EmptyResult,
}

// ============================================================================
// EXTRACTION TRAIT (PORT)
// ============================================================================

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Runs OCR over one PDF and returns its text and entity hints.
    async fn extract(
        &self,
        file: &FileDescriptor,
        content: &[u8],
    ) -> Result<ExtractedDocument, OcrError>;
}
