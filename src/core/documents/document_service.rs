// Document-store port. The core only knows that *somewhere* there is a
// folder of PDFs it can list and download; the Drive client in infra is one
// implementation, the in-memory mocks in the pipeline tests are another.

use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// One file as seen in the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// Path of the subfolder the file was found in, relative to the listing
    /// root. Empty for files directly under the root.
    pub relative_path: String,
    /// Last-modified timestamp as reported by the store (RFC 3339).
    pub modified_time: Option<String>,
}

impl FileDescriptor {
    pub fn is_pdf(&self) -> bool {
        self.mime_type == "application/pdf"
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum DocumentStoreError {
    /// Network-level failure (connect, timeout). Candidates for retry.
    #[error("transport error talking to the document store: {0}")]
    Transport(String),

    /// The store answered with an error status.
    #[error("document store API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Token acquisition failed.
    #[error("document store authentication failed: {0}")]
    Auth(String),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Read access to the remote folder of invoice PDFs.
///
/// Listing re-runs from scratch every invocation; there is no cursor carried
/// between runs. Both operations are side-effect free on the remote store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Lists every PDF under `folder_id`, descending into subfolders.
    async fn list_pdfs(&self, folder_id: &str) -> Result<Vec<FileDescriptor>, DocumentStoreError>;

    /// Downloads the raw bytes of one file.
    async fn download(&self, file: &FileDescriptor) -> Result<Vec<u8>, DocumentStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_detection_is_exact() {
        let mut file = FileDescriptor {
            id: "1".into(),
            name: "a.pdf".into(),
            mime_type: "application/pdf".into(),
            relative_path: String::new(),
            modified_time: None,
        };
        assert!(file.is_pdf());

        file.mime_type = "application/vnd.google-apps.folder".into();
        assert!(!file.is_pdf());
    }
}
