use anyhow::Result;
use knowledge_forge_ingestion::{router, AppState, IngestionConfig, KnowledgePipeline, KnowledgeStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Knowledge Forge Ingestion Service v0.1.0");

    let config = IngestionConfig::from_env()?;

    // Create directory if it doesn't exist
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store = KnowledgeStore::new(&config.db_path)?;
    info!("Database initialized at: {}", config.db_path.display());

    let backends = config.llm.build()?;
    info!(
        "Model provider: {:?} (generation: {}, embedding: {})",
        config.llm.provider,
        backends.generation.is_some(),
        backends.embedding.is_some()
    );

    let pipeline = KnowledgePipeline::new(&backends, config.llm.embedding_dimension);
    let app = router(AppState::new(store, pipeline));

    // Start server
    info!("Starting HTTP server on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
