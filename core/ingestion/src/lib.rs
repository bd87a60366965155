pub mod api;
pub mod brainstorm;
pub mod chunker;
pub mod classifier;
pub mod config;
pub mod database;
pub mod extractor;
pub mod pipeline;
pub mod title;

pub use api::{router, AppState};
pub use brainstorm::{BrainstormSeed, Brainstormer};
pub use chunker::{chunk_text, CHUNK_SIZE};
pub use classifier::{scope_color, ScopeClassifier, SCOPE_CATEGORIES};
pub use config::IngestionConfig;
pub use database::{ChunkEmbedding, KnowledgeStore, NewEntry, StoredEntry};
pub use extractor::{fallback_insights, ExtractionStrategy, InsightExtractor};
pub use pipeline::{KnowledgePipeline, ProcessedKnowledge};
pub use title::TitleGenerator;
