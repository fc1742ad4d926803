// The core module contains all business logic.
// Each feature gets its own submodule. Nothing in here touches HTTP,
// the filesystem or the process environment - that is infra's job.

#[path = "credentials/credential_service.rs"]
pub mod credentials;

#[path = "documents/document_service.rs"]
pub mod documents;

#[path = "extraction/extraction_service.rs"]
pub mod extraction;

#[path = "structuring/mod.rs"]
pub mod structuring;

#[path = "pipeline/pipeline_service.rs"]
pub mod pipeline;
