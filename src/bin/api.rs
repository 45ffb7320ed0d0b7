use query_guard::{api::start_server, config::PipelineConfig, QueryPipeline};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = PipelineConfig::from_env()?;
    if config.gemini_api_key.is_empty() {
        eprintln!("⚠️  GEMINI_API_KEY not set in .env");
    }

    info!("🚀 Query Guard - API Server");
    info!("📍 Port: {}", config.api_port);

    let pipeline = Arc::new(QueryPipeline::connect(&config).await?);

    info!("✅ Pipeline initialized");
    info!("📡 Starting API server...");

    start_server(pipeline, config.api_port).await?;

    Ok(())
}
