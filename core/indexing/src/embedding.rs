//! Chunk embedding with a shape-preserving fallback.

use futures::future::join_all;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm_providers::{EmbeddingBackend, DEFAULT_EMBEDDING_DIMENSION};

/// Embeds text through the configured backend. Never fails: when the backend
/// errors, is missing, or returns a vector of the wrong length, a random vector
/// of the configured dimension is substituted. Such vectors carry no meaning
/// and only keep the stored shape uniform.
#[derive(Clone)]
pub struct Embedder {
    backend: Option<Arc<dyn EmbeddingBackend>>,
    dimension: usize,
}

/// An embedding and whether it came from the model.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub values: Vec<f32>,
    pub is_fallback: bool,
}

impl Embedder {
    pub fn new(backend: Option<Arc<dyn EmbeddingBackend>>, dimension: usize) -> Self {
        Self { backend, dimension }
    }

    /// Embedder with no backend; every vector is a fallback.
    pub fn offline() -> Self {
        Self::new(None, DEFAULT_EMBEDDING_DIMENSION)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn embed(&self, text: &str) -> Embedding {
        let Some(backend) = self.backend.as_ref() else {
            debug!("No embedding backend configured, using random vector");
            return self.fallback();
        };

        match backend.embed(text).await {
            Ok(values) if values.len() == self.dimension => Embedding {
                values,
                is_fallback: false,
            },
            Ok(values) => {
                warn!(
                    "Embedding backend returned {} dimensions, expected {}; using random vector",
                    values.len(),
                    self.dimension
                );
                self.fallback()
            }
            Err(e) => {
                warn!("Embedding failed: {}, using random vector", e);
                self.fallback()
            }
        }
    }

    /// Embed every chunk concurrently. Output order matches input order and a
    /// failure only affects its own chunk.
    pub async fn embed_all(&self, chunks: &[String]) -> Vec<Embedding> {
        join_all(chunks.iter().map(|chunk| self.embed(chunk))).await
    }

    fn fallback(&self) -> Embedding {
        Embedding {
            values: random_embedding(self.dimension),
            is_fallback: true,
        }
    }
}

/// Uniformly random components in [-0.5, 0.5).
pub fn random_embedding(dimension: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    (0..dimension).map(|_| rng.gen::<f32>() - 0.5).collect()
}

/// Calculate cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
