pub mod models;
pub mod structuring_service;

pub use models::{InvoiceHeader, LineItem, StructuredInvoice, TokenUsage};
pub use structuring_service::{
    LanguageModelProvider, ModelReply, StructuringConfig, StructuringError, StructuringOutcome,
    StructuringRequest, StructuringService,
};
