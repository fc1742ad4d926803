// The infra module contains implementations of core ports.
// Each external service implementation goes in its own submodule.

#[path = "google/mod.rs"]
pub mod google;

#[path = "openai/mod.rs"]
pub mod openai;

#[path = "reporting/mod.rs"]
pub mod reporting;
