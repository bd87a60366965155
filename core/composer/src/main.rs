use anyhow::Result;
use knowledge_forge_composer::{router, AppState, Composer, ComposerConfig, ResponseGenerator};
use knowledge_forge_indexing::{Embedder, KnowledgeIndex, Retriever};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Knowledge Forge Composer Service v0.1.0");

    let config = ComposerConfig::from_env()?;

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let index = KnowledgeIndex::new(&config.db_path)?;
    info!("Knowledge index opened at: {}", config.db_path.display());

    let backends = config.llm.build()?;
    let retriever = Retriever::new(Embedder::new(
        backends.embedding.clone(),
        config.llm.embedding_dimension,
    ));
    let generator = ResponseGenerator::new(backends.generation.clone());

    let state = AppState {
        composer: Arc::new(Composer::new(index, retriever, generator)),
    };
    let app = router(state);

    // Start HTTP server
    info!("Starting HTTP server on http://{}", config.addr);
    info!("Chat endpoint: http://{}/chat-rag", config.addr);

    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
