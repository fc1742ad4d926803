// Structuring turns OCR text into the two record sets (header + line items).
// The language model does the heavy lifting; this service owns the prompt
// template, the output schema, and the validation of whatever comes back.
// A reply that cannot be parsed into the expected shape is a per-file
// failure, never trusted and never fatal to the batch.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use super::models::{
    InvoiceHeader, LineItem, RawInvoicePayload, StructuredInvoice, TokenUsage,
};
use crate::core::documents::FileDescriptor;
use crate::core::extraction::ExtractedDocument;

const SYSTEM_PROMPT: &str = "You are an accounting assistant that extracts structured data from \
invoice text. Answer only with the requested JSON object. Use null for any field that is not \
present in the document. Amounts are plain numbers without currency symbols or thousands \
separators.";

/// Field-by-field extraction instructions, rendered into the user prompt.
const FIELD_INSTRUCTIONS: &[(&str, &str)] = &[
    ("vendor", "Legal name of the party issuing the invoice."),
    (
        "invoice_number",
        "The invoice identifier as printed on the document, verbatim.",
    ),
    ("invoice_date", "Issue date in YYYY-MM-DD format."),
    ("due_date", "Payment due date in YYYY-MM-DD format."),
    ("currency", "ISO 4217 code of the invoice currency, e.g. EUR."),
    ("net_amount", "Taxable base amount before tax."),
    ("tax_amount", "Total tax amount in currency units."),
    ("total_amount", "Grand total including tax."),
    (
        "payment_terms",
        "Payment method or terms, e.g. 'transfer 30 days'.",
    ),
    (
        "line_items",
        "Every billable line with description, quantity, unit_price and line_total.",
    ),
];

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum StructuringError {
    #[error("language model provider error: {0}")]
    Provider(String),

    #[error("model reply is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("model reply is missing required field '{0}'")]
    MissingField(&'static str),
}

// ============================================================================
// PROVIDER TRAIT (PORT)
// ============================================================================

/// One structured-output call to a language model.
#[derive(Debug, Clone)]
pub struct StructuringRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// JSON schema the provider should enforce on the reply.
    pub schema: serde_json::Value,
}

/// Raw provider reply: the (hopefully JSON) content plus token accounting.
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub content: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait LanguageModelProvider: Send + Sync {
    async fn complete_structured(
        &self,
        request: &StructuringRequest,
    ) -> Result<ModelReply, StructuringError>;
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct StructuringConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

// ============================================================================
// SERVICE
// ============================================================================

/// Result of structuring one document, with the dollar cost of the call.
#[derive(Debug, Clone)]
pub struct StructuringOutcome {
    pub invoice: StructuredInvoice,
    pub cost_usd: f64,
}

pub struct StructuringService<P: LanguageModelProvider> {
    provider: P,
    config: StructuringConfig,
}

impl<P: LanguageModelProvider> StructuringService<P> {
    pub fn new(provider: P, config: StructuringConfig) -> Self {
        Self { provider, config }
    }

    /// Structures one extracted document into header + line items.
    pub async fn structure(
        &self,
        file: &FileDescriptor,
        document: &ExtractedDocument,
    ) -> Result<StructuringOutcome, StructuringError> {
        let request = StructuringRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_prompt: build_user_prompt(document),
            schema: output_schema(),
        };

        let reply = self.provider.complete_structured(&request).await?;
        let invoice = validate_reply(file, &reply.content)?;

        let cost_usd = call_cost(&self.config.model, &reply.usage);
        tracing::info!(
            file_id = %file.id,
            model = %self.config.model,
            input_tokens = reply.usage.input_tokens,
            cached_input_tokens = reply.usage.cached_input_tokens,
            output_tokens = reply.usage.output_tokens,
            cost_usd,
            "Structured invoice"
        );

        Ok(StructuringOutcome { invoice, cost_usd })
    }
}

// ============================================================================
// PROMPT & SCHEMA
// ============================================================================

fn build_user_prompt(document: &ExtractedDocument) -> String {
    let mut prompt = String::from(
        "#### Task ####\n\
         Extract the invoice fields listed below from the document text.\n",
    );

    for (parameter, instructions) in FIELD_INSTRUCTIONS {
        prompt.push_str("----------------------------------------------\n");
        prompt.push_str(&format!("Parameter to find: {parameter}\n"));
        prompt.push_str(&format!("Parameter instructions:\n{instructions}\n"));
    }

    prompt.push_str("----------------------------------------------\n");
    if document.fields.is_empty() {
        prompt.push_str("Preliminary results from the OCR: none\n");
    } else {
        prompt.push_str("Preliminary results from the OCR:\n");
        for (key, value) in &document.fields {
            prompt.push_str(&format!("  {key}: {value}\n"));
        }
    }
    prompt.push_str("----------------------------------------------\n");
    prompt.push_str(&format!("Pdf content:\n{}\n", document.text));
    prompt.push_str("----------------------------------------------\n");

    prompt
}

/// Strict JSON schema for the model reply. Every header field is present
/// (nullable where optional) so the provider-side validation catches shape
/// drift before we ever see it.
fn output_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": [
            "vendor", "invoice_number", "invoice_date", "due_date", "currency",
            "net_amount", "tax_amount", "total_amount", "payment_terms", "line_items"
        ],
        "properties": {
            "vendor": { "type": ["string", "null"] },
            "invoice_number": { "type": ["string", "null"] },
            "invoice_date": { "type": ["string", "null"] },
            "due_date": { "type": ["string", "null"] },
            "currency": { "type": ["string", "null"] },
            "net_amount": { "type": ["number", "null"] },
            "tax_amount": { "type": ["number", "null"] },
            "total_amount": { "type": ["number", "null"] },
            "payment_terms": { "type": ["string", "null"] },
            "line_items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["description", "quantity", "unit_price", "line_total"],
                    "properties": {
                        "description": { "type": ["string", "null"] },
                        "quantity": { "type": ["number", "null"] },
                        "unit_price": { "type": ["number", "null"] },
                        "line_total": { "type": ["number", "null"] }
                    }
                }
            }
        }
    })
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Parses and validates one model reply. `vendor`, `invoice_number` and
/// `total_amount` are the minimum for a usable header row; line items with
/// no description are dropped rather than failing the document.
fn validate_reply(
    file: &FileDescriptor,
    content: &str,
) -> Result<StructuredInvoice, StructuringError> {
    let raw: RawInvoicePayload =
        serde_json::from_str(content).map_err(|e| StructuringError::MalformedJson(e.to_string()))?;

    let vendor = non_empty(raw.vendor).ok_or(StructuringError::MissingField("vendor"))?;
    let invoice_number =
        non_empty(raw.invoice_number).ok_or(StructuringError::MissingField("invoice_number"))?;
    let total_amount = raw
        .total_amount
        .ok_or(StructuringError::MissingField("total_amount"))?;

    let header = InvoiceHeader {
        file_id: file.id.clone(),
        file_name: file.name.clone(),
        vendor,
        invoice_number,
        invoice_date: non_empty(raw.invoice_date),
        due_date: non_empty(raw.due_date),
        currency: non_empty(raw.currency),
        net_amount: raw.net_amount,
        tax_amount: raw.tax_amount,
        total_amount,
        payment_terms: non_empty(raw.payment_terms),
    };

    let line_items = raw
        .line_items
        .into_iter()
        .filter_map(|item| {
            let description = non_empty(item.description)?;
            Some(LineItem {
                // Stamped from the header so an orphan cannot exist.
                file_id: header.file_id.clone(),
                description,
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total,
            })
        })
        .collect();

    Ok(StructuredInvoice { header, line_items })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

// ============================================================================
// COST ACCOUNTING
// ============================================================================

/// USD per million (input, cached input, output) tokens.
fn model_rates(model: &str) -> Option<(f64, f64, f64)> {
    match model {
        "gpt-4o" => Some((2.50, 1.25, 10.00)),
        "gpt-4o-mini" => Some((0.15, 0.075, 0.60)),
        "gpt-4.1" => Some((2.00, 0.50, 8.00)),
        "gpt-4.1-mini" => Some((0.40, 0.10, 1.60)),
        _ => None,
    }
}

fn call_cost(model: &str, usage: &TokenUsage) -> f64 {
    let Some((input, cached, output)) = model_rates(model) else {
        tracing::warn!(model, "No cost table entry for model, reporting $0.00");
        return 0.0;
    };

    let million = 1_000_000.0;
    (usage.input_tokens as f64 * input
        + usage.cached_input_tokens as f64 * cached
        + usage.output_tokens as f64 * output)
        / million
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn descriptor() -> FileDescriptor {
        FileDescriptor {
            id: "file-1".into(),
            name: "invoice.pdf".into(),
            mime_type: "application/pdf".into(),
            relative_path: String::new(),
            modified_time: None,
        }
    }

    #[test]
    fn prompt_includes_ocr_hints_and_text() {
        let mut fields = BTreeMap::new();
        fields.insert("supplier_name".to_string(), "ACME S.L.".to_string());
        let document = ExtractedDocument {
            text: "Invoice 42 from ACME".to_string(),
            fields,
        };

        let prompt = build_user_prompt(&document);
        assert!(prompt.contains("supplier_name: ACME S.L."));
        assert!(prompt.contains("Invoice 42 from ACME"));
        assert!(prompt.contains("Parameter to find: total_amount"));
    }

    #[test]
    fn valid_reply_produces_header_and_stamped_line_items() {
        let content = serde_json::json!({
            "vendor": "ACME S.L.",
            "invoice_number": "F-2024-001",
            "invoice_date": "2024-03-01",
            "due_date": null,
            "currency": "EUR",
            "net_amount": 100.0,
            "tax_amount": 21.0,
            "total_amount": 121.0,
            "payment_terms": "transfer 30 days",
            "line_items": [
                { "description": "Widget", "quantity": 2.0, "unit_price": 50.0, "line_total": 100.0 },
                { "description": "   ", "quantity": 1.0, "unit_price": 1.0, "line_total": 1.0 }
            ]
        })
        .to_string();

        let invoice = validate_reply(&descriptor(), &content).unwrap();
        assert_eq!(invoice.header.vendor, "ACME S.L.");
        assert_eq!(invoice.header.total_amount, 121.0);
        // Blank-description line dropped, survivor stamped with the file id.
        assert_eq!(invoice.line_items.len(), 1);
        assert_eq!(invoice.line_items[0].file_id, "file-1");
    }

    #[test]
    fn malformed_json_is_a_structuring_error() {
        let err = validate_reply(&descriptor(), "{not json").unwrap_err();
        assert!(matches!(err, StructuringError::MalformedJson(_)));
    }

    #[test]
    fn missing_total_amount_is_rejected() {
        let content = serde_json::json!({
            "vendor": "ACME",
            "invoice_number": "1",
            "total_amount": null,
            "line_items": []
        })
        .to_string();

        let err = validate_reply(&descriptor(), &content).unwrap_err();
        assert!(matches!(err, StructuringError::MissingField("total_amount")));
    }

    #[test]
    fn cost_uses_the_model_rate_table() {
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            cached_input_tokens: 0,
            output_tokens: 500_000,
        };
        let cost = call_cost("gpt-4o-mini", &usage);
        assert!((cost - (0.15 + 0.30)).abs() < 1e-9);

        // Unknown model reports zero instead of failing the document.
        assert_eq!(call_cost("mystery-model", &usage), 0.0);
    }
}
