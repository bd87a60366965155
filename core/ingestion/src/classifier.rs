use anyhow::{Context, Result};
use knowledge_forge_indexing::{parse_model_json, GenerationBackend, GenerationRequest};
use knowledge_forge_schemas::ScopeResult;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chunker::truncate_chars;

pub const FALLBACK_SCOPE: &str = "General Knowledge";
pub const FALLBACK_REASONING: &str = "Fallback classification due to parsing error";

/// Characters of content included in classification prompts.
const PROMPT_CONTENT_CHARS: usize = 2000;

/// The fixed categories offered to the model, with their dashboard colours.
pub const SCOPE_CATEGORIES: [(&str, &str); 10] = [
    ("Business Strategy", "#6366F1"),
    ("Marketing & Branding", "#EC4899"),
    ("Technology & AI", "#3B82F6"),
    ("Personal Development", "#F59E0B"),
    ("Health & Wellness", "#10B981"),
    ("Finance & Investing", "#14B8A6"),
    ("Creative Projects", "#A855F7"),
    ("Learning & Education", "#F97316"),
    ("Productivity & Tools", "#84CC16"),
    ("General Knowledge", "#6B7280"),
];

/// Colour for a scope name. Novel scopes get a stable pick from the palette.
pub fn scope_color(name: &str) -> &'static str {
    if let Some((_, color)) = SCOPE_CATEGORIES.iter().find(|(category, _)| *category == name) {
        return *color;
    }

    // FNV-1a, stable across processes unlike the std hasher
    let hash = name.bytes().fold(0xcbf29ce484222325u64, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x100000001b3)
    });
    SCOPE_CATEGORIES[(hash % SCOPE_CATEGORIES.len() as u64) as usize].1
}

/// Confidence score for a classification (0.0 to 1.0)
#[derive(Debug, Clone, Copy)]
pub struct Confidence(f32);

impl Confidence {
    pub fn new(score: f32) -> Self {
        if score.is_nan() {
            return Self(0.0);
        }
        Self(score.clamp(0.0, 1.0))
    }

    pub fn score(&self) -> f32 {
        self.0
    }
}

#[derive(Debug, Deserialize)]
struct ClassificationReply {
    scope: String,
    confidence: f32,
    #[serde(default)]
    reasoning: String,
}

/// Assigns content to a knowledge scope.
///
/// With a generation backend the model chooses among [`SCOPE_CATEGORIES`] (or
/// proposes a new one). A reply that is not the expected JSON gives the fixed
/// General Knowledge fallback; transport errors are returned to the caller.
/// Without a backend the keyword heuristic decides.
pub struct ScopeClassifier {
    backend: Option<Arc<dyn GenerationBackend>>,
    keyword_patterns: Vec<(&'static str, Vec<Regex>)>,
}

impl ScopeClassifier {
    pub fn new(backend: Option<Arc<dyn GenerationBackend>>) -> Self {
        let keywords: [(&str, &[&str]); 9] = [
            ("Business Strategy", &[
                r"strateg\w*", r"business", r"compet\w+", r"market share", r"revenue",
                r"startup", r"growth", r"okrs?", r"stakeholders?",
            ]),
            ("Marketing & Branding", &[
                r"marketing", r"brand\w*", r"campaigns?", r"audience", r"seo",
                r"social media", r"content marketing", r"personali[sz]ation", r"retention",
                r"conversion",
            ]),
            ("Technology & AI", &[
                r"ai", r"ai-driven", r"machine learning", r"software", r"code",
                r"programming", r"algorithms?", r"llms?", r"neural", r"api", r"cloud",
            ]),
            ("Personal Development", &[
                r"habits?", r"mindset", r"self-improvement", r"goals?", r"confidence",
                r"motivation", r"journaling",
            ]),
            ("Health & Wellness", &[
                r"health\w*", r"fitness", r"exercise", r"sleep", r"nutrition", r"diet",
                r"meditation", r"wellness",
            ]),
            ("Finance & Investing", &[
                r"financ\w+", r"invest\w*", r"stocks?", r"portfolio", r"budget\w*",
                r"savings", r"crypto\w*", r"dividends?",
            ]),
            ("Creative Projects", &[
                r"design", r"writing", r"novel", r"music", r"art", r"creative",
                r"illustration", r"film",
            ]),
            ("Learning & Education", &[
                r"learn\w*", r"course", r"study", r"education", r"lecture", r"tutorial",
                r"books?",
            ]),
            ("Productivity & Tools", &[
                r"productivity", r"workflow", r"tools?", r"automation", r"notion",
                r"calendar", r"time management", r"to-do",
            ]),
        ];

        let keyword_patterns = keywords
            .iter()
            .map(|(category, words)| {
                let patterns = words
                    .iter()
                    .filter_map(|word| Regex::new(&format!(r"(?i)\b{}\b", word)).ok())
                    .collect();
                (*category, patterns)
            })
            .collect();

        Self {
            backend,
            keyword_patterns,
        }
    }

    pub async fn classify(&self, content: &str) -> Result<ScopeResult> {
        let Some(backend) = &self.backend else {
            return Ok(self.classify_heuristic(content));
        };

        let request = GenerationRequest::new(build_classification_prompt(content))
            .with_temperature(0.2)
            .with_max_tokens(256)
            .json();

        let reply = backend
            .generate(request)
            .await
            .context("Scope classification request failed")?;

        Ok(parse_classification(&reply))
    }

    /// Score each category by keyword hits. Ties go to the earlier category.
    pub fn classify_heuristic(&self, content: &str) -> ScopeResult {
        let mut best: Option<(&str, usize)> = None;

        for (category, patterns) in &self.keyword_patterns {
            let hits = patterns.iter().filter(|p| p.is_match(content)).count();
            if hits > 0 && best.map_or(true, |(_, top)| hits > top) {
                best = Some((*category, hits));
            }
        }

        match best {
            Some((category, hits)) => {
                debug!("Heuristic classification: {} ({} keyword hits)", category, hits);
                ScopeResult {
                    scope: category.to_string(),
                    confidence: Confidence::new((0.4 + 0.1 * hits as f32).min(0.8)).score(),
                    reasoning: format!("Matched {} {} keywords", hits, category),
                }
            }
            None => ScopeResult {
                scope: FALLBACK_SCOPE.to_string(),
                confidence: 0.5,
                reasoning: "No category keywords matched".to_string(),
            },
        }
    }
}

fn build_classification_prompt(content: &str) -> String {
    let categories = SCOPE_CATEGORIES
        .iter()
        .map(|(name, _)| format!("- {}", name))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Classify the following content into one knowledge category.

Categories:
{}

If none of these fit well, you may propose a short new category name.

Content:
{}

Respond with JSON only:
{{"scope": "category name", "confidence": 0.0-1.0, "reasoning": "one sentence"}}"#,
        categories,
        truncate_chars(content, PROMPT_CONTENT_CHARS)
    )
}

fn parse_classification(reply: &str) -> ScopeResult {
    match parse_model_json::<ClassificationReply>(reply) {
        Ok(parsed) if !parsed.scope.trim().is_empty() => ScopeResult {
            scope: parsed.scope.trim().to_string(),
            confidence: Confidence::new(parsed.confidence).score(),
            reasoning: parsed.reasoning,
        },
        Ok(_) => {
            warn!("Classifier returned an empty scope, using fallback");
            fallback_scope()
        }
        Err(e) => {
            warn!("Failed to parse classifier reply, using fallback: {}", e);
            fallback_scope()
        }
    }
}

pub fn fallback_scope() -> ScopeResult {
    ScopeResult {
        scope: FALLBACK_SCOPE.to_string(),
        confidence: 0.5,
        reasoning: FALLBACK_REASONING.to_string(),
    }
}
