pub mod auth;
pub mod document_ai_client;
pub mod drive_client;

pub use auth::ServiceAccountAuth;
pub use document_ai_client::{DocumentAiClient, DocumentAiConfig};
pub use drive_client::DriveClient;
