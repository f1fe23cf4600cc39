//! Planner - Resolves references, classifies the question, plans searches
//!
//! Provides:
//! - Input validation
//! - Bounded conversation history window
//! - Search request normalization (top_k bounds, fan-out cap)

use super::collaborators::{PlanDraft, ReasoningCapability};
use super::trace::{ReasoningTrace, StepName};
use super::types::{ConversationTurn, Plan, Question, QuestionType, SearchRequest};
use crate::config::EngineConfig;
use crate::errors::{AppError, Result};
use crate::resilience::RetryPolicy;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Planner configuration
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Conversation turns shown to the capability (H)
    pub max_history_turns: usize,

    /// Upper bound for any request's top_k
    pub max_top_k: usize,

    /// top_k used when the draft gives none or a non-positive one
    pub default_top_k: usize,

    /// Maximum requests kept from one plan (N)
    pub max_search_requests: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for PlannerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_history_turns: config.max_history_turns,
            max_top_k: config.max_top_k,
            default_top_k: config.default_top_k,
            max_search_requests: config.max_search_requests,
        }
    }
}

/// Planner step
pub struct Planner {
    capability: Arc<dyn ReasoningCapability>,
    retry: RetryPolicy,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(
        capability: Arc<dyn ReasoningCapability>,
        retry: RetryPolicy,
        config: PlannerConfig,
    ) -> Self {
        Self {
            capability,
            retry,
            config,
        }
    }

    /// Turn a raw question and prior turns into a resolved question and searches
    pub async fn plan(
        &self,
        history: &[ConversationTurn],
        raw_question: &str,
        trace: &mut ReasoningTrace,
    ) -> Result<Plan> {
        let raw = raw_question.trim();
        if raw.is_empty() {
            return Err(AppError::invalid_input("question must not be empty"));
        }

        let window = recent_window(history, self.config.max_history_turns);

        let draft = self
            .retry
            .run("plan", || self.capability.plan(raw, window))
            .await
            .map_err(|source| AppError::Planning { source })?;

        let plan = self.normalize(raw, draft.clone());

        let resolution = if plan.question.resolved == raw {
            "no references resolved".to_string()
        } else if draft.resolved_references.is_empty() {
            format!("resolved to \"{}\"", plan.question.resolved)
        } else {
            format!("resolved {}", draft.resolved_references.join(", "))
        };

        trace.record_with(
            StepName::Planning,
            format!(
                "Classified as {}; {}; planned {} search(es)",
                plan.question.question_type.as_str(),
                resolution,
                plan.search_requests.len()
            ),
            json!({
                "question_type": plan.question.question_type,
                "resolved_question": plan.question.resolved,
                "history_turns": window.len(),
                "queries": plan.search_requests,
            }),
        );

        info!(
            question_type = plan.question.question_type.as_str(),
            searches = plan.search_requests.len(),
            history_turns = window.len(),
            "Generated plan"
        );

        Ok(plan)
    }

    /// Apply the planner's bounds to a capability draft
    fn normalize(&self, raw: &str, draft: PlanDraft) -> Plan {
        let resolved = match draft.resolved_question.trim() {
            "" => raw.to_string(),
            resolved => resolved.to_string(),
        };
        let question_type = QuestionType::from_label(&draft.question_type);

        let limit = draft
            .max_searches
            .and_then(|n| usize::try_from(n).ok())
            .filter(|&n| n > 0)
            .map_or(self.config.max_search_requests, |n| {
                n.min(self.config.max_search_requests)
            });

        let mut requests: Vec<SearchRequest> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for entry in draft.search_queries {
            let query = entry.query.trim();
            if query.is_empty() {
                continue;
            }
            let top_k = self.bound_top_k(entry.top_k);
            let key = query.to_lowercase();

            // Repeated query: keep one request with the larger top_k
            if let Some(&idx) = seen.get(&key) {
                let existing: &mut SearchRequest = &mut requests[idx];
                existing.top_k = existing.top_k.max(top_k);
                continue;
            }
            if requests.len() == limit {
                break;
            }
            seen.insert(key, requests.len());
            requests.push(SearchRequest::new(query, top_k));
        }

        if requests.is_empty() {
            requests.push(SearchRequest::new(resolved.clone(), self.config.default_top_k));
        }

        Plan {
            question: Question {
                raw: raw.to_string(),
                resolved,
                question_type,
            },
            search_requests: requests,
        }
    }

    fn bound_top_k(&self, requested: Option<i64>) -> usize {
        match requested {
            Some(k) if k > 0 => usize::try_from(k)
                .map_or(self.config.max_top_k, |k| k.min(self.config.max_top_k)),
            _ => self.config.default_top_k,
        }
    }
}

/// The last `limit` turns, oldest first
fn recent_window(history: &[ConversationTurn], limit: usize) -> &[ConversationTurn] {
    &history[history.len().saturating_sub(limit)..]
}
