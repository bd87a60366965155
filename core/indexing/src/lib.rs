pub mod embedding;
pub mod llm_providers;
pub mod schema;
pub mod search;

pub use embedding::{cosine_similarity, random_embedding, Embedder, Embedding};
pub use llm_providers::{
    parse_model_json, strip_code_fences, EmbeddingBackend, GeminiProvider, GenerationBackend,
    GenerationRequest, LLMConfig, LLMProvider, ModelBackends, OllamaProvider, OpenAIProvider,
};
pub use schema::{ensure_schema, now_rfc3339};
pub use search::{extract_keywords, KnowledgeIndex, KnowledgeLookup, RetrievalConfig, Retriever};
