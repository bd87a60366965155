use knowledge_forge_schemas::RetrievedChunk;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions about the user's personal knowledge base. \
Answer only from the provided context. If the context does not contain enough information to answer, say so plainly \
instead of guessing. Mention which entries you drew from when it helps.";

/// Renders retrieved chunks into the prompt sent to the model
pub struct TemplateRenderer;

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    /// One block per chunk with its title, scope and content, in retrieval order.
    pub fn render_context(&self, chunks: &[RetrievedChunk]) -> String {
        chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                format!(
                    "[{}] {} (Scope: {})\n{}",
                    i + 1,
                    chunk.title,
                    chunk.scope_name,
                    chunk.content_chunk.trim()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }

    pub fn render_prompt(&self, query: &str, context: &str) -> String {
        let context = if context.is_empty() {
            "(no matching knowledge found)"
        } else {
            context
        };

        format!(
            "Context from the user's knowledge base:\n\n{}\n\nQuestion: {}\n\nAnswer:",
            context, query
        )
    }
}
