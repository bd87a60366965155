use anyhow::Result;
use knowledge_forge_indexing::{GenerationBackend, GenerationRequest, KnowledgeLookup, Retriever};
use knowledge_forge_schemas::{ChatResponse, ChatSource, EntryId, RetrievedChunk};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::templates::{TemplateRenderer, SYSTEM_PROMPT};

pub const NOTHING_FOUND_MESSAGE: &str = "I couldn't find relevant information in your knowledge base to answer that question. \
Try adding more knowledge or rephrasing your question.";

pub const TROUBLE_PROCESSING_MESSAGE: &str =
    "I'm having trouble processing your question right now. Please try again in a moment.";

const CONFIDENCE_WITH_CONTEXT: f32 = 0.8;
const CONFIDENCE_WITHOUT_CONTEXT: f32 = 0.3;
const CONFIDENCE_NOTHING_FOUND: f32 = 0.1;
const CONFIDENCE_TROUBLE: f32 = 0.2;

/// Answers a query strictly from retrieved context
pub struct ResponseGenerator {
    renderer: TemplateRenderer,
    backend: Option<Arc<dyn GenerationBackend>>,
}

impl ResponseGenerator {
    pub fn new(backend: Option<Arc<dyn GenerationBackend>>) -> Self {
        Self {
            renderer: TemplateRenderer::new(),
            backend,
        }
    }

    /// Never fails: generation errors become fixed messages with low confidence.
    pub async fn generate(&self, query: &str, chunks: &[RetrievedChunk]) -> ChatResponse {
        let context = self.renderer.render_context(chunks);
        let sources = sources_from(chunks);

        let answer = match &self.backend {
            Some(backend) => {
                let request = GenerationRequest::new(self.renderer.render_prompt(query, &context))
                    .with_system(SYSTEM_PROMPT)
                    .with_temperature(0.4)
                    .with_max_tokens(1024);
                backend.generate(request).await
            }
            None => Err(anyhow::anyhow!("no generation backend configured")),
        };

        match answer {
            Ok(response) => {
                let confidence = if chunks.is_empty() {
                    CONFIDENCE_WITHOUT_CONTEXT
                } else {
                    CONFIDENCE_WITH_CONTEXT
                };
                debug!("Generated answer from {} chunks", chunks.len());
                ChatResponse {
                    response: response.trim().to_string(),
                    sources,
                    confidence,
                }
            }
            Err(e) if chunks.is_empty() => {
                warn!("Generation failed with no context: {}", e);
                ChatResponse {
                    response: NOTHING_FOUND_MESSAGE.to_string(),
                    sources,
                    confidence: CONFIDENCE_NOTHING_FOUND,
                }
            }
            Err(e) => {
                warn!("Generation failed with {} context chunks: {}", chunks.len(), e);
                ChatResponse {
                    response: TROUBLE_PROCESSING_MESSAGE.to_string(),
                    sources,
                    confidence: CONFIDENCE_TROUBLE,
                }
            }
        }
    }
}

/// Distinct entries in retrieval order, each with its first (best) similarity.
pub fn sources_from(chunks: &[RetrievedChunk]) -> Vec<ChatSource> {
    let mut seen: HashSet<&EntryId> = HashSet::new();

    chunks
        .iter()
        .filter(|chunk| seen.insert(&chunk.entry_id))
        .map(|chunk| ChatSource {
            entry_id: chunk.entry_id.clone(),
            title: chunk.title.clone(),
            scope_name: chunk.scope_name.clone(),
            similarity: chunk.similarity,
        })
        .collect()
}

/// Retrieval-augmented chat over one user's knowledge
pub struct Composer<L: KnowledgeLookup> {
    index: Mutex<L>,
    retriever: Retriever,
    generator: ResponseGenerator,
}

impl<L: KnowledgeLookup> Composer<L> {
    pub fn new(index: L, retriever: Retriever, generator: ResponseGenerator) -> Self {
        Self {
            index: Mutex::new(index),
            retriever,
            generator,
        }
    }

    /// Storage failures during retrieval are returned; model failures are not.
    pub async fn chat(&self, user_id: &str, message: &str) -> Result<ChatResponse> {
        info!("Chat request from user {}", user_id);

        let chunks = self.retriever.retrieve(&self.index, user_id, message).await?;
        let response = self.generator.generate(message, &chunks).await;

        info!(
            "Answered with {} sources (confidence {:.1})",
            response.sources.len(),
            response.confidence
        );
        Ok(response)
    }
}
