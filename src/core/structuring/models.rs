use serde::Deserialize;

/// Document-level fields of one invoice. One row per successfully processed
/// PDF. Immutable once produced; lives only for the duration of the run
/// unless the report writer persists it.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceHeader {
    /// Identifier of the source PDF in the document store.
    pub file_id: String,
    pub file_name: String,
    pub vendor: String,
    pub invoice_number: String,
    pub invoice_date: Option<String>,
    pub due_date: Option<String>,
    pub currency: Option<String>,
    pub net_amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub total_amount: f64,
    pub payment_terms: Option<String>,
}

/// One billable entry within an invoice. Many-to-one with `InvoiceHeader`
/// via `file_id`; the structurer stamps the id itself so an orphan line item
/// cannot be constructed from a model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub file_id: String,
    pub description: String,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub line_total: Option<f64>,
}

/// Validated result of structuring one document.
#[derive(Debug, Clone)]
pub struct StructuredInvoice {
    pub header: InvoiceHeader,
    pub line_items: Vec<LineItem>,
}

/// Token counts reported by the language-model provider for one call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
}

// ============================================================================
// RAW MODEL PAYLOAD
// ============================================================================
// Shape of the JSON the language model is instructed to emit. Everything is
// optional at this stage; `StructuringService::validate` decides which gaps
// are acceptable.

#[derive(Debug, Deserialize)]
pub(crate) struct RawInvoicePayload {
    pub vendor: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub due_date: Option<String>,
    pub currency: Option<String>,
    pub net_amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub total_amount: Option<f64>,
    pub payment_terms: Option<String>,
    #[serde(default)]
    pub line_items: Vec<RawLineItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawLineItem {
    pub description: Option<String>,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub line_total: Option<f64>,
}
