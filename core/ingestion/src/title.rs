use knowledge_forge_indexing::{strip_code_fences, GenerationBackend, GenerationRequest};
use std::sync::Arc;
use tracing::warn;

use crate::chunker::truncate_chars;

pub const UNTITLED: &str = "Untitled Knowledge";
pub const MAX_TITLE_WORDS: usize = 10;

const PROMPT_CONTENT_CHARS: usize = 1500;

/// Short purpose-stating titles. Never fails; any problem yields [`UNTITLED`].
pub struct TitleGenerator {
    backend: Option<Arc<dyn GenerationBackend>>,
}

impl TitleGenerator {
    pub fn new(backend: Option<Arc<dyn GenerationBackend>>) -> Self {
        Self { backend }
    }

    pub async fn generate(&self, content: &str) -> String {
        let Some(backend) = &self.backend else {
            return heuristic_title(content);
        };

        let prompt = format!(
            "Write a title of at most {} words that states the purpose of the following content. \
             Reply with the title only, no quotes.\n\nContent:\n{}",
            MAX_TITLE_WORDS,
            truncate_chars(content, PROMPT_CONTENT_CHARS)
        );
        let request = GenerationRequest::new(prompt)
            .with_temperature(0.4)
            .with_max_tokens(32);

        match backend.generate(request).await {
            Ok(reply) => match clean_title(&reply) {
                Some(title) => title,
                None => {
                    warn!("Title reply was empty, using default title");
                    UNTITLED.to_string()
                }
            },
            Err(e) => {
                warn!("Title generation failed, using default title: {}", e);
                UNTITLED.to_string()
            }
        }
    }
}

/// Strip fences, surrounding quotes and extra lines from a model title.
pub fn clean_title(raw: &str) -> Option<String> {
    let unfenced = strip_code_fences(raw);
    let first_line = unfenced.lines().find(|line| !line.trim().is_empty())?;
    let unquoted = first_line
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '“' | '”'))
        .trim();

    let title = first_words(unquoted, MAX_TITLE_WORDS);
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// First sentence, cut to ten words.
pub fn heuristic_title(content: &str) -> String {
    let first_sentence = content
        .split(['.', '!', '?', '\n'])
        .map(str::trim)
        .find(|sentence| !sentence.is_empty())
        .unwrap_or("");

    let title = first_words(first_sentence, MAX_TITLE_WORDS);
    if title.is_empty() {
        UNTITLED.to_string()
    } else {
        title
    }
}

fn first_words(text: &str, max: usize) -> String {
    text.split_whitespace().take(max).collect::<Vec<_>>().join(" ")
}
