// Document AI implementation of the `TextExtractor` port. One synchronous
// `:process` call per PDF: the document goes up base64-embedded in the
// request, the full text and any labeled entities come back in the response.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::auth::ServiceAccountAuth;
use crate::core::documents::FileDescriptor;
use crate::core::extraction::{ExtractedDocument, OcrError, TextExtractor};

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct DocumentAiConfig {
    pub project_id: String,
    /// Processor region, e.g. "eu" or "us".
    pub location: String,
    pub processor_id: String,
}

impl DocumentAiConfig {
    /// Full resource name of the processor.
    fn processor_name(&self) -> String {
        format!(
            "projects/{}/locations/{}/processors/{}",
            self.project_id, self.location, self.processor_id
        )
    }

    fn process_url(&self) -> String {
        format!(
            "https://{}-documentai.googleapis.com/v1/{}:process",
            self.location,
            self.processor_name()
        )
    }
}

// ============================================================================
// API RESPONSE STRUCTURES
// ============================================================================

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    document: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct Document {
    text: Option<String>,
    #[serde(default)]
    entities: Vec<Entity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Entity {
    #[serde(rename = "type")]
    entity_type: Option<String>,
    mention_text: Option<String>,
}

// ============================================================================
// CLIENT
// ============================================================================

pub struct DocumentAiClient {
    http: Client,
    auth: Arc<ServiceAccountAuth>,
    config: DocumentAiConfig,
}

impl DocumentAiClient {
    pub fn new(http: Client, auth: Arc<ServiceAccountAuth>, config: DocumentAiConfig) -> Self {
        Self { http, auth, config }
    }
}

#[async_trait]
impl TextExtractor for DocumentAiClient {
    async fn extract(
        &self,
        file: &FileDescriptor,
        content: &[u8],
    ) -> Result<ExtractedDocument, OcrError> {
        let token = self
            .auth
            .get_access_token()
            .await
            .map_err(|e| OcrError::Auth(e.to_string()))?;

        let payload = json!({
            "rawDocument": {
                "content": STANDARD.encode(content),
                "mimeType": "application/pdf",
            }
        });

        let response = self
            .http
            .post(self.config.process_url())
            .header("Authorization", format!("Bearer {token}"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| OcrError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
            return Err(OcrError::Provider { status, message });
        }

        let parsed: ProcessResponse = response
            .json()
            .await
            .map_err(|e| OcrError::Transport(e.to_string()))?;

        let document = parse_document(parsed)?;
        tracing::debug!(
            file_id = %file.id,
            chars = document.text.len(),
            entities = document.fields.len(),
            "Document AI extraction finished"
        );
        Ok(document)
    }
}

/// Pulls the text and entity hints out of a `:process` response. A reply
/// with no text at all counts as an OCR failure for this file.
fn parse_document(response: ProcessResponse) -> Result<ExtractedDocument, OcrError> {
    let document = response.document.ok_or(OcrError::EmptyResult)?;

    let text = document
        .text
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(OcrError::EmptyResult);
    }

    let mut fields = BTreeMap::new();
    for entity in document.entities {
        if let (Some(entity_type), Some(mention)) = (entity.entity_type, entity.mention_text) {
            fields.insert(entity_type, mention);
        }
    }

    Ok(ExtractedDocument { text, fields })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DocumentAiConfig {
        DocumentAiConfig {
            project_id: "proj".into(),
            location: "eu".into(),
            processor_id: "abc123".into(),
        }
    }

    #[test]
    fn process_url_embeds_the_processor_resource() {
        assert_eq!(
            config().process_url(),
            "https://eu-documentai.googleapis.com/v1/projects/proj/locations/eu/processors/abc123:process"
        );
    }

    #[test]
    fn parses_text_and_entities() {
        let response: ProcessResponse = serde_json::from_str(
            r#"{
                "document": {
                    "text": "  Invoice F-1 total 121.00  ",
                    "entities": [
                        { "type": "supplier_name", "mentionText": "ACME S.L." },
                        { "type": "total_amount", "mentionText": "121.00" },
                        { "type": "unlabeled" }
                    ]
                }
            }"#,
        )
        .unwrap();

        let document = parse_document(response).unwrap();
        assert_eq!(document.text, "Invoice F-1 total 121.00");
        assert_eq!(document.fields.len(), 2);
        assert_eq!(document.fields["supplier_name"], "ACME S.L.");
    }

    #[test]
    fn empty_text_is_an_ocr_failure() {
        let response: ProcessResponse =
            serde_json::from_str(r#"{ "document": { "text": "   " } }"#).unwrap();
        assert!(matches!(
            parse_document(response).unwrap_err(),
            OcrError::EmptyResult
        ));

        let response: ProcessResponse = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            parse_document(response).unwrap_err(),
            OcrError::EmptyResult
        ));
    }
}
