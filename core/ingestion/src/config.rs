use anyhow::Result;
use knowledge_forge_indexing::LLMConfig;
use std::path::PathBuf;

pub const DEFAULT_DB_PATH: &str = "./data/knowledge.db";
pub const DEFAULT_ADDR: &str = "127.0.0.1:21953";

/// Runtime settings for the ingestion service
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub db_path: PathBuf,
    pub addr: String,
    pub llm: LLMConfig,
}

impl IngestionConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            db_path: std::env::var("DB_PATH")
                .unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
                .into(),
            addr: std::env::var("INGESTION_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string()),
            llm: LLMConfig::from_env()?,
        })
    }
}
