use anyhow::{Context, Result};
use knowledge_forge_indexing::{parse_model_json, GenerationBackend, GenerationRequest};
use knowledge_forge_schemas::BrainstormIdea;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Entries considered when brainstorming across a user's knowledge.
pub const BRAINSTORM_ENTRY_LIMIT: usize = 10;

pub const EMPTY_KNOWLEDGE_MESSAGE: &str =
    "Add some knowledge first, then come back for ideas built on it.";

/// What the brainstormer sees of one stored entry.
#[derive(Debug, Clone)]
pub struct BrainstormSeed {
    pub title: String,
    pub scope_name: String,
    pub summary: String,
}

/// Models answer either with a bare array or wrapped in an object.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdeasReply {
    List(Vec<BrainstormIdea>),
    Wrapped { ideas: Vec<BrainstormIdea> },
}

pub struct Brainstormer {
    backend: Option<Arc<dyn GenerationBackend>>,
}

impl Brainstormer {
    pub fn new(backend: Option<Arc<dyn GenerationBackend>>) -> Self {
        Self { backend }
    }

    /// Ideas connecting the given entries. An unusable reply yields no ideas.
    pub async fn generate(&self, seeds: &[BrainstormSeed]) -> Result<Vec<BrainstormIdea>> {
        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        let Some(backend) = &self.backend else {
            info!("Brainstorming skipped: no generation backend configured");
            return Ok(Vec::new());
        };

        let request = GenerationRequest::new(build_brainstorm_prompt(seeds))
            .with_temperature(0.8)
            .with_max_tokens(1536)
            .json();

        let reply = backend
            .generate(request)
            .await
            .context("Brainstorming request failed")?;

        match parse_model_json::<IdeasReply>(&reply) {
            Ok(IdeasReply::List(ideas)) | Ok(IdeasReply::Wrapped { ideas }) => {
                info!("Generated {} brainstorming ideas from {} entries", ideas.len(), seeds.len());
                Ok(ideas)
            }
            Err(e) => {
                warn!("Failed to parse brainstorming reply: {}", e);
                Ok(Vec::new())
            }
        }
    }
}

fn build_brainstorm_prompt(seeds: &[BrainstormSeed]) -> String {
    let knowledge = seeds
        .iter()
        .map(|seed| format!("- [{}] {}: {}", seed.scope_name, seed.title, seed.summary))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Here is a person's recent knowledge:
{}

Suggest 3-5 creative ideas, projects or experiments that combine or build on this knowledge.

Return a JSON array:
[
  {{"title": "short idea title", "description": "2-3 sentences", "relatedScopes": ["scope name"]}}
]"#,
        knowledge
    )
}
