//! Contracts the engine needs from the outside world
//!
//! The engine never knows how search or generation is computed, only
//! these request/response shapes and the three failure classes of
//! [`CollaboratorError`].

use super::types::{ConversationTurn, EvidenceItem, EvidenceSet, Question, SearchRequest};
use crate::errors::CollaboratorError;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Similarity search over chunked documents
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Best matches for `request.query`, restricted to the `scope` collection,
    /// ordered by descending relevance
    async fn search(
        &self,
        request: &SearchRequest,
        scope: Uuid,
    ) -> Result<Vec<EvidenceItem>, CollaboratorError>;
}

/// Language reasoning used by the planner, evaluator and synthesizer steps
#[async_trait]
pub trait ReasoningCapability: Send + Sync {
    async fn plan(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<PlanDraft, CollaboratorError>;

    async fn evaluate(
        &self,
        question: &Question,
        evidence: &EvidenceSet,
    ) -> Result<EvaluationDraft, CollaboratorError>;

    /// Answer text grounded in `evidence`, which is numbered from 1 in order
    async fn synthesize(
        &self,
        question: &Question,
        evidence: &EvidenceSet,
    ) -> Result<String, CollaboratorError>;
}

/// Read-only access to a session's conversation
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// At most `limit` most recent turns, oldest first
    async fn recent_turns(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, CollaboratorError>;
}

/// Raw planner output before validation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanDraft {
    pub resolved_question: String,
    pub question_type: String,
    pub search_queries: Vec<SearchQueryDraft>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub max_searches: Option<i64>,
    /// Human-readable notes such as "'it' -> 'the cache layer'"
    #[serde(default)]
    pub resolved_references: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchQueryDraft {
    pub query: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub top_k: Option<i64>,
}

/// Accept any JSON number (or numeric string) for a count; range checks
/// belong to the planner, not to parsing
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(count_from_value))
}

fn count_from_value(value: &Value) -> Option<i64> {
    let float = match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i);
            }
            if let Some(u) = n.as_u64() {
                return Some(i64::try_from(u).unwrap_or(i64::MAX));
            }
            n.as_f64()
        }
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;

    // `as` saturates at the i64 bounds
    float.is_finite().then(|| float.round() as i64)
}

/// Raw evaluator output before clamping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationDraft {
    pub is_sufficient: bool,
    #[serde(alias = "confidence_score")]
    pub confidence: f64,
    #[serde(default)]
    pub missing_aspects: Vec<String>,
    #[serde(default)]
    pub suggested_followups: Vec<String>,
}
