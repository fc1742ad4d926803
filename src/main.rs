// Entry point of the invoice ingestion pipeline.
//
// **Architecture Overview:**
// - `core/` = Business logic and ports (no HTTP, no filesystem, no env)
// - `infra/` = Implementations of core ports (Drive, Document AI, OpenAI, CSV)
//
// This file's job is to:
// 1. Load configuration from the environment
// 2. Reconstruct the credential artifacts (fail-fast, before any network call)
// 3. Wire the clients into the pipeline (dependency injection)
// 4. Run one batch and map the result to the process exit code

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with a pile of mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

use crate::core::credentials::CredentialBundle;
use crate::core::pipeline::{Pipeline, PipelineOptions, RunSummary};
use crate::core::structuring::{StructuringConfig, StructuringService};
use crate::infra::google::{DocumentAiClient, DocumentAiConfig, DriveClient, ServiceAccountAuth};
use crate::infra::openai::OpenAiClient;
use crate::infra::reporting::CsvReportWriter;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Everything the run needs beyond the credential blobs, read once from the
/// environment and passed down explicitly.
struct PipelineConfig {
    drive_folder_id: String,
    document_ai: DocumentAiConfig,
    openai_api_key: String,
    structuring: StructuringConfig,
    output_dir: String,
    http_timeout: Duration,
}

impl PipelineConfig {
    fn from_env() -> anyhow::Result<Self> {
        let structuring = StructuringConfig {
            model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            temperature: std::env::var("OPENAI_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse::<f32>().ok())
                .unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: std::env::var("OPENAI_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok()),
        };

        Ok(Self {
            drive_folder_id: required_var("DRIVE_FOLDER_ID")?,
            document_ai: DocumentAiConfig {
                project_id: required_var("DOCAI_PROJECT_ID")?,
                location: std::env::var("DOCAI_LOCATION").unwrap_or_else(|_| "eu".to_string()),
                processor_id: required_var("DOCAI_PROCESSOR_ID")?,
            },
            openai_api_key: required_var("OPENAI_API_KEY")?,
            structuring,
            output_dir: std::env::var("OUTPUT_DIR")
                .unwrap_or_else(|_| DEFAULT_OUTPUT_DIR.to_string()),
            http_timeout: Duration::from_secs(
                std::env::var("HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
        })
    }
}

fn required_var(name: &'static str) -> anyhow::Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => anyhow::bail!("missing required environment variable {name}"),
    }
}

// ============================================================================
// ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment variables from a .env file (if one exists)
    dotenv::dotenv().ok();

    match run().await {
        Ok(summary) => {
            tracing::info!(
                files_listed = summary.files_listed,
                files_succeeded = summary.files_succeeded,
                files_skipped = summary.files_skipped,
                total_cost_usd = summary.total_cost_usd,
                headers = %summary.reports.headers_path.display(),
                line_items = %summary.reports.line_items_path.display(),
                run_log = %summary.reports.run_log_path.display(),
                "Pipeline run finished"
            );
            // Per-file failures are recorded in the run log, not the exit
            // code: the scheduler only needs to react to fatal errors.
        }
        Err(err) => {
            tracing::error!("Pipeline run failed: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<RunSummary> {
    let config = PipelineConfig::from_env()?;

    // ========================================================================
    // CREDENTIAL RECONSTRUCTION
    // ========================================================================
    // All three artifacts must decode before any client is built; a bad
    // secret fails the run right here.

    let service_account = std::env::var("GOOGLE_SERVICE_ACCOUNT_B64").ok();
    let client_secret = std::env::var("GOOGLE_CLIENT_SECRET_B64").ok();
    let token_cache = std::env::var("GOOGLE_TOKEN_B64").ok();

    let bundle = CredentialBundle::from_encoded(
        service_account.as_deref(),
        client_secret.as_deref(),
        token_cache.as_deref(),
    )
    .context("reconstructing credentials")?;

    tracing::debug!(
        client_secret_bytes = bundle.client_secret.len(),
        token_cache_bytes = bundle.token_cache.len(),
        "Credential bundle reconstructed"
    );

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Wire the concrete clients into the pipeline. This is the composition
    // root; nothing below main knows about the environment.

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("building HTTP client")?;

    let auth = Arc::new(
        ServiceAccountAuth::from_json(http.clone(), &bundle.service_account_key)
            .context("parsing service account key")?,
    );

    let store = DriveClient::new(http.clone(), Arc::clone(&auth));
    let extractor = DocumentAiClient::new(http.clone(), Arc::clone(&auth), config.document_ai.clone());

    let provider = OpenAiClient::new(http, config.openai_api_key.clone(), config.structuring.clone());
    let structurer = StructuringService::new(provider, config.structuring.clone());

    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let writer = CsvReportWriter::new(&config.output_dir, stamp);

    let pipeline = Pipeline::new(store, extractor, structurer, writer, PipelineOptions::default());

    let summary = pipeline.run(&config.drive_folder_id).await?;
    Ok(summary)
}
