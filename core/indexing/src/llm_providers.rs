//! Remote model providers behind two narrow capabilities: text generation and
//! text embedding. Every pipeline component talks to these traits, never to a
//! concrete HTTP API.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;

/// A single prompt sent to a generative model.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub json_mode: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: 0.3,
            max_tokens: 1024,
            json_mode: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Ask the provider for a JSON-only reply where it supports that.
    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String>;
}

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LLMProvider {
    Gemini,
    Ollama,
    OpenAI,
    /// No remote model; components use their heuristic paths.
    Disabled,
}

#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub timeout_secs: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::Ollama,
            api_key: None,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            timeout_secs: 60,
        }
    }
}

impl LLMConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        let gemini_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());

        let provider = match std::env::var("LLM_PROVIDER")
            .map(|p| p.to_lowercase())
            .ok()
            .as_deref()
        {
            Some("gemini") => LLMProvider::Gemini,
            Some("openai") => LLMProvider::OpenAI,
            Some("ollama") => LLMProvider::Ollama,
            Some("none") | Some("disabled") => LLMProvider::Disabled,
            Some(other) => anyhow::bail!("Unknown LLM_PROVIDER '{}'", other),
            None if gemini_key.is_some() => LLMProvider::Gemini,
            None => LLMProvider::Ollama,
        };

        let embedding_dimension = env_parse("EMBEDDING_DIMENSION", DEFAULT_EMBEDDING_DIMENSION)?;
        let timeout_secs = env_parse("LLM_TIMEOUT_SECS", 60u64)?;

        let config = match provider {
            LLMProvider::Gemini => Self {
                provider,
                api_key: Some(gemini_key.context("GEMINI_API_KEY required for Gemini provider")?),
                base_url: env_or("GEMINI_BASE_URL", "https://generativelanguage.googleapis.com"),
                model: env_or("GEMINI_MODEL", "gemini-1.5-flash"),
                embedding_model: env_or("GEMINI_EMBEDDING_MODEL", "text-embedding-004"),
                embedding_dimension,
                timeout_secs,
            },
            LLMProvider::OpenAI => Self {
                provider,
                api_key: Some(
                    std::env::var("OPENAI_API_KEY")
                        .context("OPENAI_API_KEY required for OpenAI provider")?,
                ),
                base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com"),
                model: env_or("OPENAI_MODEL", "gpt-4o-mini"),
                embedding_model: env_or("OPENAI_EMBEDDING_MODEL", "text-embedding-3-small"),
                embedding_dimension,
                timeout_secs,
            },
            LLMProvider::Ollama => Self {
                provider,
                api_key: None,
                base_url: env_or("OLLAMA_URL", "http://localhost:11434"),
                model: env_or("OLLAMA_MODEL", "llama3.2:3b"),
                embedding_model: env_or("OLLAMA_EMBEDDING_MODEL", "nomic-embed-text"),
                embedding_dimension,
                timeout_secs,
            },
            LLMProvider::Disabled => Self {
                provider,
                api_key: None,
                base_url: String::new(),
                model: String::new(),
                embedding_model: String::new(),
                embedding_dimension,
                timeout_secs,
            },
        };

        Ok(config)
    }

    /// Build the generation and embedding backends for this provider.
    pub fn build(&self) -> Result<ModelBackends> {
        let client = Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let backends = match self.provider {
            LLMProvider::Gemini => {
                let provider = Arc::new(GeminiProvider::with_client(client, self));
                ModelBackends {
                    generation: Some(provider.clone()),
                    embedding: Some(provider),
                }
            }
            LLMProvider::OpenAI => {
                let provider = Arc::new(OpenAIProvider::with_client(client, self));
                ModelBackends {
                    generation: Some(provider.clone()),
                    embedding: Some(provider),
                }
            }
            LLMProvider::Ollama => {
                let provider = Arc::new(OllamaProvider::with_client(client, self));
                ModelBackends {
                    generation: Some(provider.clone()),
                    embedding: Some(provider),
                }
            }
            LLMProvider::Disabled => ModelBackends::default(),
        };

        Ok(backends)
    }
}

/// Constructed once at startup and handed to every component that needs a model.
#[derive(Clone, Default)]
pub struct ModelBackends {
    pub generation: Option<Arc<dyn GenerationBackend>>,
    pub embedding: Option<Arc<dyn EmbeddingBackend>>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow!("Failed to parse env var {}={}: {}", key, val, e)),
        Err(_) => Ok(default),
    }
}

// ============================================================================
// Reply parsing
// ============================================================================

/// Strip surrounding whitespace and a Markdown code fence (```json ... ```).
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string ("json", "JSON", ...) on the opening fence line
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };

    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a model reply as JSON, tolerating a code fence around it.
pub fn parse_model_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(strip_code_fences(raw)).context("Model reply is not valid JSON")
}

async fn error_for_status(response: reqwest::Response, api: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    Err(anyhow!("{} API error {}: {}", api, status, error_text))
}

// ============================================================================
// Gemini
// ============================================================================

/// Google Generative Language API (generateContent / embedContent)
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    embedding_model: String,
}

impl GeminiProvider {
    fn with_client(client: Client, config: &LLMConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone().unwrap_or_default(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
        }
    }
}

#[async_trait]
impl GenerationBackend for GeminiProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);

        let mut generation_config = json!({
            "temperature": request.temperature,
            "maxOutputTokens": request.max_tokens,
        });
        if request.json_mode {
            generation_config["responseMimeType"] = json!("application/json");
        }

        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": generation_config,
        });
        if let Some(system) = request.system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }

        debug!("Calling Gemini at {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to call Gemini API")?;
        let response = error_for_status(response, "Gemini").await?;

        #[derive(Deserialize)]
        struct GeminiResponse {
            #[serde(default)]
            candidates: Vec<GeminiCandidate>,
        }

        #[derive(Deserialize)]
        struct GeminiCandidate {
            content: GeminiContent,
        }

        #[derive(Deserialize)]
        struct GeminiContent {
            #[serde(default)]
            parts: Vec<GeminiPart>,
        }

        #[derive(Deserialize)]
        struct GeminiPart {
            #[serde(default)]
            text: String,
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts.into_iter().map(|p| p.text).collect::<String>())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| anyhow!("No response from Gemini"))
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!(
            "{}/v1beta/models/{}:embedContent",
            self.base_url, self.embedding_model
        );

        let body = json!({
            "model": format!("models/{}", self.embedding_model),
            "content": { "parts": [{ "text": text }] },
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to call Gemini embedding API")?;
        let response = error_for_status(response, "Gemini").await?;

        #[derive(Deserialize)]
        struct EmbedResponse {
            embedding: EmbeddingValues,
        }

        #[derive(Deserialize)]
        struct EmbeddingValues {
            values: Vec<f32>,
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .context("Failed to parse Gemini embedding response")?;

        Ok(parsed.embedding.values)
    }
}

// ============================================================================
// Ollama
// ============================================================================

/// Ollama Provider for local LLM inference
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    embedding_model: String,
}

impl OllamaProvider {
    fn with_client(client: Client, config: &LLMConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
        }
    }
}

#[async_trait]
impl GenerationBackend for OllamaProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let mut request_body = json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            }
        });
        if let Some(system) = request.system {
            request_body["system"] = json!(system);
        }
        if request.json_mode {
            request_body["format"] = json!("json");
        }

        debug!("Calling Ollama at {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .context("Failed to call Ollama API")?;
        let response = error_for_status(response, "Ollama").await?;

        #[derive(Deserialize)]
        struct OllamaResponse {
            response: String,
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response)
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embed", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&json!({ "model": self.embedding_model, "input": text }))
            .send()
            .await
            .context("Failed to call Ollama embedding API")?;
        let response = error_for_status(response, "Ollama").await?;

        #[derive(Deserialize)]
        struct OllamaEmbeddingResponse {
            #[serde(default)]
            embeddings: Vec<Vec<f32>>,
        }

        let parsed: OllamaEmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse Ollama embedding response")?;

        parsed
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embeddings array from Ollama"))
    }
}

// ============================================================================
// OpenAI
// ============================================================================

/// OpenAI-compatible chat completions and embeddings
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    embedding_model: String,
}

impl OpenAIProvider {
    fn with_client(client: Client, config: &LLMConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone().unwrap_or_default(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenAIProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut messages = vec![];
        if let Some(system) = request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let mut request_body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.json_mode {
            request_body["response_format"] = json!({ "type": "json_object" });
        }

        debug!("Calling OpenAI at {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .context("Failed to call OpenAI API")?;
        let response = error_for_status(response, "OpenAI").await?;

        #[derive(Deserialize)]
        struct OpenAIResponse {
            choices: Vec<OpenAIChoice>,
        }

        #[derive(Deserialize)]
        struct OpenAIChoice {
            message: OpenAIMessage,
        }

        #[derive(Deserialize)]
        struct OpenAIMessage {
            content: Option<String>,
        }

        let openai_response: OpenAIResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;

        openai_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("No response from OpenAI"))
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAIProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.embedding_model, "input": text }))
            .send()
            .await
            .context("Failed to call OpenAI embedding API")?;
        let response = error_for_status(response, "OpenAI").await?;

        #[derive(Deserialize)]
        struct EmbeddingsResponse {
            data: Vec<EmbeddingData>,
        }

        #[derive(Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI embedding response")?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("Empty embedding data from OpenAI"))
    }
}
