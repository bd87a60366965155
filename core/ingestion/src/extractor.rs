use anyhow::{Context, Result};
use knowledge_forge_indexing::{parse_model_json, GenerationBackend, GenerationRequest};
use knowledge_forge_schemas::Insights;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chunker::truncate_chars;

const SUMMARY_FALLBACK_CHARS: usize = 200;
const FALLBACK_KEY_POINTS: usize = 3;
const PROMPT_CONTENT_CHARS: usize = 4000;

/// Extraction strategy for insights
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExtractionStrategy {
    /// Sentence-split summary, no model call
    HeuristicOnly,
    /// Model extraction, sentence-split fallback when the reply is unusable
    LLMWithFallback,
}

/// Produces the structured summary stored with every entry
pub struct InsightExtractor {
    strategy: ExtractionStrategy,
    backend: Option<Arc<dyn GenerationBackend>>,
}

impl InsightExtractor {
    pub fn new(backend: Option<Arc<dyn GenerationBackend>>) -> Self {
        let strategy = if backend.is_some() {
            ExtractionStrategy::LLMWithFallback
        } else {
            ExtractionStrategy::HeuristicOnly
        };

        Self { strategy, backend }
    }

    pub fn strategy(&self) -> ExtractionStrategy {
        self.strategy
    }

    pub async fn extract(&self, content: &str) -> Result<Insights> {
        let backend = match (self.strategy, &self.backend) {
            (ExtractionStrategy::LLMWithFallback, Some(backend)) => backend,
            _ => return Ok(fallback_insights(content)),
        };

        let request = GenerationRequest::new(build_insights_prompt(content))
            .with_temperature(0.3)
            .with_max_tokens(1024)
            .json();

        let reply = backend
            .generate(request)
            .await
            .context("Insight extraction request failed")?;

        match parse_model_json::<Insights>(&reply) {
            Ok(insights) if !insights.summary.trim().is_empty() => {
                debug!(
                    "Extracted {} key points, {} entities, {} tags",
                    insights.key_points.len(),
                    insights.entities.len(),
                    insights.tags.len()
                );
                Ok(insights)
            }
            Ok(_) => {
                warn!("Insight reply had no summary, using sentence fallback");
                Ok(fallback_insights(content))
            }
            Err(e) => {
                warn!("Failed to parse insight reply, using sentence fallback: {}", e);
                Ok(fallback_insights(content))
            }
        }
    }
}

fn build_insights_prompt(content: &str) -> String {
    format!(
        r#"Analyze the following content and extract structured insights.

Content:
{}

Return a JSON object with this structure:
{{
  "summary": "2-3 sentence summary",
  "keyPoints": ["main point", "..."],
  "entities": ["people, organizations, products or concepts mentioned"],
  "tags": ["short lowercase tags"],
  "actionableInsights": ["concrete things the reader could do"]
}}"#,
        truncate_chars(content, PROMPT_CONTENT_CHARS)
    )
}

/// Naive insights: the opening 200 characters and the first three sentences.
pub fn fallback_insights(content: &str) -> Insights {
    let summary = format!("{}...", truncate_chars(content, SUMMARY_FALLBACK_CHARS));

    let key_points = content
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .take(FALLBACK_KEY_POINTS)
        .map(str::to_string)
        .collect();

    Insights {
        summary,
        key_points,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct FixedReply(&'static str);

    #[async_trait]
    impl GenerationBackend for FixedReply {
        async fn generate(&self, _request: GenerationRequest) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Failing;

    #[async_trait]
    impl GenerationBackend for Failing {
        async fn generate(&self, _request: GenerationRequest) -> Result<String> {
            Err(anyhow!("HTTP 500"))
        }
    }

    #[test]
    fn test_fallback_fewer_than_three_sentences() {
        let insights = fallback_insights("First idea. Second idea!");
        assert_eq!(insights.key_points, vec!["First idea", "Second idea"]);
        assert_eq!(insights.summary, "First idea. Second idea!...");
        assert!(insights.entities.is_empty());
        assert!(insights.tags.is_empty());
        assert!(insights.actionable_insights.is_empty());
    }

    #[test]
    fn test_fallback_caps_key_points_and_summary() {
        let content = format!("One. Two? Three! Four. {}", "z".repeat(400));
        let insights = fallback_insights(&content);
        assert_eq!(insights.key_points, vec!["One", "Two", "Three"]);
        assert_eq!(insights.summary.chars().count(), SUMMARY_FALLBACK_CHARS + 3);
        assert!(insights.summary.ends_with("..."));
    }

    #[tokio::test]
    async fn test_model_insights_parsed() {
        let extractor = InsightExtractor::new(Some(Arc::new(FixedReply(
            r#"{"summary": "Personalization lifted retention.", "keyPoints": ["AI personalization"], "entities": ["Q3"], "tags": ["marketing"], "actionableInsights": ["Extend to Q4"]}"#,
        ))));
        assert_eq!(extractor.strategy(), ExtractionStrategy::LLMWithFallback);

        let insights = extractor.extract("content").await.unwrap();
        assert_eq!(insights.summary, "Personalization lifted retention.");
        assert_eq!(insights.actionable_insights, vec!["Extend to Q4"]);
    }

    #[tokio::test]
    async fn test_missing_fields_default_to_empty() {
        let extractor = InsightExtractor::new(Some(Arc::new(FixedReply(r#"{"summary": "Short."}"#))));
        let insights = extractor.extract("content").await.unwrap();
        assert_eq!(insights.summary, "Short.");
        assert!(insights.key_points.is_empty());
    }

    #[tokio::test]
    async fn test_unparsable_reply_falls_back() {
        let extractor = InsightExtractor::new(Some(Arc::new(FixedReply("Sure! Here are insights:"))));
        let insights = extractor.extract("Alpha. Beta.").await.unwrap();
        assert_eq!(insights, fallback_insights("Alpha. Beta."));
    }

    #[tokio::test]
    async fn test_request_failure_propagates() {
        let extractor = InsightExtractor::new(Some(Arc::new(Failing)));
        assert!(extractor.extract("Alpha.").await.is_err());
    }

    #[tokio::test]
    async fn test_heuristic_only_without_backend() {
        let extractor = InsightExtractor::new(None);
        assert_eq!(extractor.strategy(), ExtractionStrategy::HeuristicOnly);
        let insights = extractor.extract("Alpha. Beta.").await.unwrap();
        assert_eq!(insights.key_points, vec!["Alpha", "Beta"]);
    }
}
