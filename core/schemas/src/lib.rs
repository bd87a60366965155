use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ULID and ID Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub String);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Knowledge Schema
// ============================================================================

/// A category grouping related entries. Unique per (user, name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeScope {
    pub id: ScopeId,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub created_at: String, // RFC3339
    pub updated_at: String, // RFC3339
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: EntryId,
    pub user_id: String,
    pub scope_id: ScopeId,
    pub title: String,
    pub content: String,
    pub source_url: Option<String>,
    pub processed_content: Insights,
    pub created_at: String, // RFC3339
    pub updated_at: String, // RFC3339
}

/// One fixed-size slice of an entry's content together with its vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingChunk {
    pub id: ChunkId,
    pub entry_id: EntryId,
    pub user_id: String,
    pub content_chunk: String,
    pub embedding: Vec<f32>,
    pub chunk_index: u32,
    pub created_at: String, // RFC3339
}

/// Output of the scope classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeResult {
    pub scope: String,
    pub confidence: f32,
    pub reasoning: String,
}

/// Structured summary stored as an entry's `processed_content`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub actionable_insights: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrainstormIdea {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub related_scopes: Vec<String>,
}

// ============================================================================
// Retrieval Schema
// ============================================================================

/// Which fallback tier produced a retrieved row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrievalTier {
    #[serde(rename = "semantic")]
    Semantic,
    #[serde(rename = "keyword")]
    Keyword,
    #[serde(rename = "recent")]
    Recent,
}

impl RetrievalTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalTier::Semantic => "semantic",
            RetrievalTier::Keyword => "keyword",
            RetrievalTier::Recent => "recent",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub entry_id: EntryId,
    pub title: String,
    pub content_chunk: String,
    pub scope_name: String,
    pub similarity: f32,
    pub tier: RetrievalTier,
}

// ============================================================================
// Subscription Schema
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionTier {
    #[serde(rename = "pro")]
    Pro,
    #[serde(rename = "premium")]
    Premium,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::Premium => "premium",
        }
    }

    /// Display label stored on the subscriber row.
    pub fn label(&self) -> &'static str {
        match self {
            SubscriptionTier::Pro => "Pro",
            SubscriptionTier::Premium => "Premium",
        }
    }

    /// Monthly price in USD, formatted the way the payment provider expects.
    pub fn monthly_price(&self) -> &'static str {
        match self {
            SubscriptionTier::Pro => "9.99",
            SubscriptionTier::Premium => "19.99",
        }
    }

    /// Resolve a provider-side tier identifier (plan id, custom id, product id).
    /// Anything mentioning "premium" is Premium, everything else is Pro.
    pub fn from_tier_id(tier_id: &str) -> Self {
        if tier_id.to_lowercase().contains("premium") {
            SubscriptionTier::Premium
        } else {
            SubscriptionTier::Pro
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    #[serde(rename = "pending")]
    Pending,       // Created, waiting for buyer approval
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "suspended")]
    Suspended,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Suspended => "suspended",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(SubscriptionStatus::Pending),
            "active" => Some(SubscriptionStatus::Active),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            "suspended" => Some(SubscriptionStatus::Suspended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    pub email: String,
    pub user_id: String,
    pub external_subscription_id: Option<String>,
    pub subscribed: bool,
    pub subscription_tier: Option<String>,
    pub subscription_end: Option<String>, // RFC3339
    pub status: SubscriptionStatus,
    pub updated_at: String, // RFC3339
}

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessKnowledgeRequest {
    pub title: Option<String>,
    pub content: String,
    pub source_url: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub generate_brainstorming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessKnowledgeResponse {
    pub success: bool,
    pub entry_id: EntryId,
    pub scope_name: String,
    pub insights: Insights,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brainstorming: Option<Vec<BrainstormIdea>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteKnowledgeRequest {
    pub entry_id: EntryId,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSource {
    pub entry_id: EntryId,
    pub title: String,
    pub scope_name: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub sources: Vec<ChatSource>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrainstormRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainstormResponse {
    pub ideas: Vec<BrainstormIdea>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub tier: SubscriptionTier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionResponse {
    pub url: String,
    pub subscription_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionStatusResponse {
    pub subscribed: bool,
    pub subscription_tier: Option<String>,
    pub subscription_end: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeSummary {
    #[serde(flatten)]
    pub scope: KnowledgeScope,
    pub entry_count: usize,
}

// ============================================================================
// Helper Functions
// ============================================================================

pub fn generate_scope_id() -> ScopeId {
    ScopeId(format!("scope_{}", ulid::Ulid::new()))
}

pub fn generate_entry_id() -> EntryId {
    EntryId(format!("entry_{}", ulid::Ulid::new()))
}

pub fn generate_chunk_id() -> ChunkId {
    ChunkId(format!("chunk_{}", ulid::Ulid::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation() {
        let scope_id = generate_scope_id();
        assert!(scope_id.0.starts_with("scope_"));
        assert_eq!(scope_id.0.len(), 32); // "scope_" + 26 chars

        let entry_id = generate_entry_id();
        assert!(entry_id.0.starts_with("entry_"));

        let chunk_id = generate_chunk_id();
        assert!(chunk_id.0.starts_with("chunk_"));
    }

    #[test]
    fn test_insights_use_camel_case() {
        let insights = Insights {
            summary: "s".into(),
            key_points: vec!["a".into()],
            entities: vec![],
            tags: vec![],
            actionable_insights: vec!["do it".into()],
        };

        let json = serde_json::to_value(&insights).unwrap();
        assert_eq!(json["keyPoints"][0], "a");
        assert_eq!(json["actionableInsights"][0], "do it");

        // Missing arrays default to empty
        let partial: Insights = serde_json::from_str(r#"{"summary":"only"}"#).unwrap();
        assert_eq!(partial.summary, "only");
        assert!(partial.key_points.is_empty());
    }

    #[test]
    fn test_process_request_defaults() {
        let request: ProcessKnowledgeRequest =
            serde_json::from_str(r#"{"content":"hello","userId":"u1"}"#).unwrap();
        assert_eq!(request.user_id, "u1");
        assert!(request.title.is_none());
        assert!(!request.generate_brainstorming);
    }

    #[test]
    fn test_tier_resolution() {
        assert_eq!(SubscriptionTier::from_tier_id("kf-premium-monthly"), SubscriptionTier::Premium);
        assert_eq!(SubscriptionTier::from_tier_id("PREMIUM"), SubscriptionTier::Premium);
        assert_eq!(SubscriptionTier::from_tier_id("P-5ML4271244454362WXNWU5NQ"), SubscriptionTier::Pro);
        assert_eq!(SubscriptionTier::Premium.label(), "Premium");

        let request: CreateSubscriptionRequest = serde_json::from_str(r#"{"tier":"premium"}"#).unwrap();
        assert_eq!(request.tier, SubscriptionTier::Premium);
        assert!(serde_json::from_str::<CreateSubscriptionRequest>(r#"{"tier":"gold"}"#).is_err());
    }

    #[test]
    fn test_brainstorm_response_omits_empty_message() {
        let response = BrainstormResponse { ideas: vec![], message: None };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"ideas":[]}"#);
    }

    #[test]
    fn test_subscription_status_round_trip() {
        for status in [
            SubscriptionStatus::Pending,
            SubscriptionStatus::Active,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Suspended,
        ] {
            assert_eq!(SubscriptionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SubscriptionStatus::parse("unknown"), None);
    }
}
