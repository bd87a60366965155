use anyhow::Result;
use knowledge_forge_indexing::{Embedder, ModelBackends};
use knowledge_forge_schemas::{Insights, ScopeResult};
use tracing::{info, warn};

use crate::brainstorm::Brainstormer;
use crate::chunker::{chunk_text, CHUNK_SIZE};
use crate::classifier::ScopeClassifier;
use crate::database::ChunkEmbedding;
use crate::extractor::InsightExtractor;
use crate::title::TitleGenerator;

/// Output of the AI steps for one submission, ready for the store.
#[derive(Debug, Clone)]
pub struct ProcessedKnowledge {
    pub title: String,
    pub scope: ScopeResult,
    pub insights: Insights,
    pub chunks: Vec<ChunkEmbedding>,
    /// Chunks whose embedding is a random placeholder
    pub fallback_chunks: usize,
}

/// Title, scope, insights and chunk embeddings for submitted content.
///
/// The four steps are independent and run concurrently; the result does not
/// depend on the order they finish in.
pub struct KnowledgePipeline {
    titles: TitleGenerator,
    classifier: ScopeClassifier,
    extractor: InsightExtractor,
    embedder: Embedder,
    brainstormer: Brainstormer,
}

impl KnowledgePipeline {
    pub fn new(backends: &ModelBackends, embedding_dimension: usize) -> Self {
        let generation = backends.generation.clone();

        Self {
            titles: TitleGenerator::new(generation.clone()),
            classifier: ScopeClassifier::new(generation.clone()),
            extractor: InsightExtractor::new(generation.clone()),
            embedder: Embedder::new(backends.embedding.clone(), embedding_dimension),
            brainstormer: Brainstormer::new(generation),
        }
    }

    pub fn brainstormer(&self) -> &Brainstormer {
        &self.brainstormer
    }

    /// Run every AI step. A caller-supplied title skips title generation.
    pub async fn process(&self, content: &str, title: Option<&str>) -> Result<ProcessedKnowledge> {
        let chunk_texts = chunk_text(content, CHUNK_SIZE);

        let title_step = async {
            match title.map(str::trim).filter(|t| !t.is_empty()) {
                Some(title) => title.to_string(),
                None => self.titles.generate(content).await,
            }
        };

        let (title, scope, insights, embeddings) = tokio::join!(
            title_step,
            self.classifier.classify(content),
            self.extractor.extract(content),
            self.embedder.embed_all(&chunk_texts),
        );

        let scope = scope?;
        let insights = insights?;

        let fallback_chunks = embeddings.iter().filter(|e| e.is_fallback).count();
        if fallback_chunks > 0 {
            warn!(
                "{} of {} chunks stored with placeholder embeddings",
                fallback_chunks,
                embeddings.len()
            );
        }

        let chunks: Vec<ChunkEmbedding> = chunk_texts
            .into_iter()
            .zip(embeddings)
            .map(|(content, embedding)| ChunkEmbedding {
                content,
                embedding: embedding.values,
            })
            .collect();

        info!(
            "Processed knowledge '{}': scope '{}' ({:.2}), {} chunks",
            title,
            scope.scope,
            scope.confidence,
            chunks.len()
        );

        Ok(ProcessedKnowledge {
            title,
            scope,
            insights,
            chunks,
            fallback_chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use knowledge_forge_indexing::{EmbeddingBackend, GenerationBackend, GenerationRequest};
    use std::sync::Arc;

    /// Answers by prompt shape so every step gets a sensible reply.
    struct ScriptedModel;

    #[async_trait]
    impl GenerationBackend for ScriptedModel {
        async fn generate(&self, request: GenerationRequest) -> Result<String> {
            let reply = if request.prompt.starts_with("Classify") {
                r#"{"scope": "Technology & AI", "confidence": 0.9, "reasoning": "Code"}"#
            } else if request.prompt.starts_with("Analyze") {
                r#"{"summary": "About Rust.", "keyPoints": ["ownership"]}"#
            } else {
                "Rust Ownership Primer"
            };
            Ok(reply.to_string())
        }
    }

    struct BrokenEmbeddings;

    #[async_trait]
    impl EmbeddingBackend for BrokenEmbeddings {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(anyhow!("embedding service down"))
        }
    }

    #[tokio::test]
    async fn test_process_combines_all_steps() {
        let backends = ModelBackends {
            generation: Some(Arc::new(ScriptedModel)),
            embedding: Some(Arc::new(BrokenEmbeddings)),
        };
        let pipeline = KnowledgePipeline::new(&backends, 8);

        let content = "r".repeat(1200);
        let processed = pipeline.process(&content, None).await.unwrap();

        assert_eq!(processed.title, "Rust Ownership Primer");
        assert_eq!(processed.scope.scope, "Technology & AI");
        assert_eq!(processed.insights.key_points, vec!["ownership"]);
        assert_eq!(processed.chunks.len(), 3);
        assert_eq!(processed.fallback_chunks, 3);
        assert!(processed.chunks.iter().all(|c| c.embedding.len() == 8));
        assert_eq!(
            processed.chunks.iter().map(|c| c.content.as_str()).collect::<String>(),
            content
        );
    }

    #[tokio::test]
    async fn test_supplied_title_is_kept() {
        let pipeline = KnowledgePipeline::new(&ModelBackends::default(), 4);
        let processed = pipeline
            .process("Budget for the quarter. Save more.", Some("  My Budget  "))
            .await
            .unwrap();

        assert_eq!(processed.title, "My Budget");
        assert_eq!(processed.scope.scope, "Finance & Investing");
        assert_eq!(processed.insights.key_points, vec!["Budget for the quarter", "Save more"]);
    }
}
