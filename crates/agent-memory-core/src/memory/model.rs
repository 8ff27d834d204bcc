//! Core data model: `Memory`, its lifecycle inputs, and recall results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse classification assigned at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    QaPair,
    User,
    Assistant,
    Fact,
    Preference,
    Rule,
    Conversation,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::QaPair => "qa_pair",
            Category::User => "user",
            Category::Assistant => "assistant",
            Category::Fact => "fact",
            Category::Preference => "preference",
            Category::Rule => "rule",
            Category::Conversation => "conversation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "qa_pair" => Category::QaPair,
            "user" => Category::User,
            "assistant" => Category::Assistant,
            "fact" => Category::Fact,
            "preference" => Category::Preference,
            "rule" => Category::Rule,
            "conversation" => Category::Conversation,
            _ => return None,
        })
    }

    /// `rule`/`preference` are the exclusive-slot categories the conflict
    /// detector and WriteMerge treat specially (spec §4.10, §4.11).
    pub fn is_exclusive_candidate(&self) -> bool {
        matches!(self, Category::Rule | Category::Preference | Category::Fact)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether the dense vector for a memory is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    Present,
    Pending,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Present => "present",
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "present" => EmbeddingStatus::Present,
            "failed" => EmbeddingStatus::Failed,
            _ => EmbeddingStatus::Pending,
        }
    }
}

/// Which candidate layers were actually consulted for a recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Full,
    DegradedNoVector,
    DegradedNoLexical,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Full => "full",
            SearchMode::DegradedNoVector => "degraded_no_vector",
            SearchMode::DegradedNoLexical => "degraded_no_lexical",
        }
    }
}

/// Bucketed confidence assigned from the final fused/reranked score (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub fn from_score(score: f32) -> Self {
        if score >= 0.7 {
            ConfidenceTier::High
        } else if score >= 0.4 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    pub fn at_least_medium(&self) -> bool {
        matches!(self, ConfidenceTier::High | ConfidenceTier::Medium)
    }
}

/// The durable unit of memory. See spec §3 for field semantics and invariants.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: String,
    pub agent: String,
    pub text: String,
    pub normalized_text: String,
    pub category: Category,
    pub memory_type: String,
    pub importance: f32,
    pub strength: f32,
    pub created_at: DateTime<Utc>,
    pub last_reinforced_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: i64,
    pub reinforce_count: i64,
    pub pinned: bool,
    pub soft_deleted_at: Option<DateTime<Utc>>,
    pub superseded_by: Option<String>,
    pub session: Option<String>,
    pub source: Option<String>,
    pub provenance: Option<String>,
    pub namespace: Option<String>,
    pub embedding_status: EmbeddingStatus,
}

impl Memory {
    /// Construct a freshly-created memory; `strength` starts at 1.0 per spec §3.
    pub fn new(id: String, agent: String, text: String, normalized_text: String, category: Category) -> Self {
        let now = Utc::now();
        Self {
            id,
            agent,
            text,
            normalized_text,
            memory_type: category.as_str().to_string(),
            category,
            importance: 0.5,
            strength: 1.0,
            created_at: now,
            last_reinforced_at: now,
            last_accessed_at: now,
            access_count: 0,
            reinforce_count: 0,
            pinned: false,
            soft_deleted_at: None,
            superseded_by: None,
            session: None,
            source: None,
            provenance: None,
            namespace: None,
            embedding_status: EmbeddingStatus::Pending,
        }
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.soft_deleted_at.is_some()
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_milliseconds() as f64 / 86_400_000.0
    }

    pub fn days_since_reinforced(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_reinforced_at).num_milliseconds() as f64 / 86_400_000.0
    }
}

/// Structured recall filter (spec §4.1 "Filter grammar").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filter {
    pub namespace: Option<String>,
    pub category: Option<Category>,
    pub include_soft_deleted: bool,
    pub min_importance: Option<f32>,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// Per-layer and fused scores returned to callers (spec §3 "RecallResult").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerScores {
    pub semantic: Option<f32>,
    pub lexical: Option<f32>,
    pub recency: Option<f32>,
    pub strength: Option<f32>,
    pub importance: Option<f32>,
    pub reranker_primary: Option<f32>,
    pub reranker_secondary: Option<f32>,
}

impl Default for LayerScores {
    fn default() -> Self {
        Self {
            semantic: None,
            lexical: None,
            recency: None,
            strength: None,
            importance: None,
            reranker_primary: None,
            reranker_secondary: None,
        }
    }
}

/// Transient, per-request result row (spec §3 "RecallResult").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallResult {
    pub memory: Memory,
    pub scores: LayerScores,
    pub score: f32,
    pub confidence_tier: ConfidenceTier,
    pub search_mode: SearchMode,
    pub cached: bool,
}

/// Input to a single-memory insert (`/v1/store`, `/v1/rule`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StoreInput {
    pub text: String,
    pub agent: String,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub importance: Option<f32>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// One message within a `/v1/capture` batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CaptureMessage {
    pub text: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
}

/// Input to `/v1/capture`: a batch of raw messages to classify, embed, and store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CaptureInput {
    pub agent: String,
    pub messages: Vec<CaptureMessage>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Input to `/v1/recall` and `/v1/search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecallInput {
    pub query: String,
    pub agent: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub min_score: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_fields_on_recall_input() {
        let raw = serde_json::json!({
            "query": "hello",
            "agent": "main",
            "sneaky_extra_field": true,
        });
        let result: Result<RecallInput, _> = serde_json::from_value(raw);
        assert!(result.is_err(), "deny_unknown_fields must reject unexpected input keys");
    }

    #[test]
    fn confidence_tier_thresholds() {
        assert_eq!(ConfidenceTier::from_score(0.71), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(0.7), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(0.4), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(0.39), ConfidenceTier::Low);
    }

    #[test]
    fn new_memory_invariants() {
        let m = Memory::new("id1".into(), "main".into(), "hi".into(), "hi".into(), Category::Fact);
        assert_eq!(m.strength, 1.0);
        assert!(m.created_at <= m.last_reinforced_at);
        assert!(m.created_at <= m.last_accessed_at);
        assert!(!m.pinned);
        assert!(!m.is_soft_deleted());
    }
}
