// Google Drive implementation of the `DocumentStore` port, against the
// Drive v3 REST API. Listing walks the folder tree iteratively (folders are
// pushed onto a work stack with their relative path) and follows
// `nextPageToken` pagination inside each folder.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;

use super::auth::ServiceAccountAuth;
use crate::core::documents::{DocumentStore, DocumentStoreError, FileDescriptor};

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const PAGE_SIZE: u32 = 100;

// ============================================================================
// API RESPONSE STRUCTURES
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    modified_time: Option<String>,
}

// ============================================================================
// CLIENT
// ============================================================================

pub struct DriveClient {
    http: Client,
    auth: Arc<ServiceAccountAuth>,
}

impl DriveClient {
    pub fn new(http: Client, auth: Arc<ServiceAccountAuth>) -> Self {
        Self { http, auth }
    }

    async fn bearer(&self) -> Result<String, DocumentStoreError> {
        self.auth
            .get_access_token()
            .await
            .map_err(|e| DocumentStoreError::Auth(e.to_string()))
    }

    /// Fetches one page of a folder listing.
    async fn list_page(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<FileList, DocumentStoreError> {
        let token = self.bearer().await?;

        let mut query = vec![
            ("q".to_string(), folder_query(folder_id)),
            ("pageSize".to_string(), PAGE_SIZE.to_string()),
            (
                "fields".to_string(),
                "nextPageToken, files(id, name, mimeType, modifiedTime)".to_string(),
            ),
        ];
        if let Some(page_token) = page_token {
            query.push(("pageToken".to_string(), page_token.to_string()));
        }

        let response = self
            .http
            .get(FILES_URL)
            .query(&query)
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .map_err(|e| DocumentStoreError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
            return Err(DocumentStoreError::Api { status, message });
        }

        response
            .json()
            .await
            .map_err(|e| DocumentStoreError::Transport(e.to_string()))
    }
}

#[async_trait]
impl DocumentStore for DriveClient {
    async fn list_pdfs(&self, folder_id: &str) -> Result<Vec<FileDescriptor>, DocumentStoreError> {
        let mut pdfs = Vec::new();
        // (folder id, relative path from the listing root)
        let mut pending = vec![(folder_id.to_string(), String::new())];

        while let Some((folder, path)) = pending.pop() {
            let mut page_token: Option<String> = None;
            loop {
                let page = self.list_page(&folder, page_token.as_deref()).await?;
                let (files, subfolders) = partition_entries(page.files, &path);
                pdfs.extend(files);
                pending.extend(subfolders);

                match page.next_page_token {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }
        }

        tracing::info!(folder_id, pdfs = pdfs.len(), "Listed Drive folder");
        Ok(pdfs)
    }

    async fn download(&self, file: &FileDescriptor) -> Result<Vec<u8>, DocumentStoreError> {
        let token = self.bearer().await?;
        let url = format!("{FILES_URL}/{}", file.id);

        let response = self
            .http
            .get(&url)
            .query(&[("alt", "media")])
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .map_err(|e| DocumentStoreError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
            return Err(DocumentStoreError::Api { status, message });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DocumentStoreError::Transport(e.to_string()))?;

        tracing::debug!(file_id = %file.id, bytes = bytes.len(), "Downloaded PDF");
        Ok(bytes.to_vec())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn folder_query(folder_id: &str) -> String {
    format!("'{folder_id}' in parents and trashed = false")
}

/// Splits one listing page into PDFs (as descriptors carrying the current
/// relative path) and subfolders to descend into.
fn partition_entries(
    entries: Vec<DriveFile>,
    relative_path: &str,
) -> (Vec<FileDescriptor>, Vec<(String, String)>) {
    let mut pdfs = Vec::new();
    let mut subfolders = Vec::new();

    for entry in entries {
        if entry.mime_type == FOLDER_MIME {
            let child_path = if relative_path.is_empty() {
                entry.name.clone()
            } else {
                format!("{relative_path}/{}", entry.name)
            };
            subfolders.push((entry.id, child_path));
            continue;
        }

        let descriptor = FileDescriptor {
            id: entry.id,
            name: entry.name,
            mime_type: entry.mime_type,
            relative_path: relative_path.to_string(),
            modified_time: entry.modified_time,
        };
        // Anything else in the folder (images, sheets) is ignored.
        if descriptor.is_pdf() {
            pdfs.push(descriptor);
        }
    }

    (pdfs, subfolders)
}
