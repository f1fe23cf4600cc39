//! Evaluator - Judges whether gathered evidence answers the question

use super::collaborators::{EvaluationDraft, ReasoningCapability};
use super::trace::{ReasoningTrace, StepName};
use super::types::{Evaluation, EvidenceSet, Question};
use crate::errors::{AppError, Result};
use crate::resilience::RetryPolicy;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Evaluator step
pub struct Evaluator {
    capability: Arc<dyn ReasoningCapability>,
    retry: RetryPolicy,
}

impl Evaluator {
    pub fn new(capability: Arc<dyn ReasoningCapability>, retry: RetryPolicy) -> Self {
        Self { capability, retry }
    }

    pub async fn evaluate(
        &self,
        question: &Question,
        evidence: &EvidenceSet,
        trace: &mut ReasoningTrace,
    ) -> Result<Evaluation> {
        let draft = self
            .retry
            .run("evaluate", || self.capability.evaluate(question, evidence))
            .await
            .map_err(|source| AppError::Evaluation { source })?;

        let evaluation = sanitize(draft);

        trace.record_with(
            StepName::Evaluation,
            format!(
                "Evidence {} (confidence {:.2}) over {} item(s)",
                if evaluation.is_sufficient {
                    "sufficient"
                } else {
                    "insufficient"
                },
                evaluation.confidence,
                evidence.len()
            ),
            json!({
                "is_sufficient": evaluation.is_sufficient,
                "confidence": evaluation.confidence,
                "missing_aspects": evaluation.missing_aspects,
                "suggested_followups": evaluation.suggested_followups,
            }),
        );

        info!(
            sufficient = evaluation.is_sufficient,
            confidence = evaluation.confidence,
            evidence = evidence.len(),
            "Evaluated evidence"
        );

        Ok(evaluation)
    }
}

/// Clamp confidence into [0, 1] and drop blank entries
fn sanitize(draft: EvaluationDraft) -> Evaluation {
    let confidence = if draft.confidence.is_nan() {
        0.0
    } else {
        draft.confidence.clamp(0.0, 1.0) as f32
    };

    Evaluation {
        is_sufficient: draft.is_sufficient,
        confidence,
        missing_aspects: non_blank(draft.missing_aspects),
        suggested_followups: non_blank(draft.suggested_followups),
    }
}

fn non_blank(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{chunk, question, ScriptedReasoner};
    use crate::errors::CollaboratorError;

    fn draft(confidence: f64) -> EvaluationDraft {
        EvaluationDraft {
            is_sufficient: false,
            confidence,
            missing_aspects: vec!["  ".to_string(), "pricing".to_string()],
            suggested_followups: vec!["pricing tiers".to_string(), String::new()],
        }
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(sanitize(draft(1.7)).confidence, 1.0);
        assert_eq!(sanitize(draft(-0.2)).confidence, 0.0);
        assert_eq!(sanitize(draft(f64::NAN)).confidence, 0.0);
        assert_eq!(sanitize(draft(0.55)).confidence, 0.55);
    }

    #[test]
    fn test_blank_entries_are_dropped() {
        let evaluation = sanitize(draft(0.3));
        assert_eq!(evaluation.missing_aspects, vec!["pricing".to_string()]);
        assert_eq!(evaluation.suggested_followups, vec!["pricing tiers".to_string()]);
    }

    #[tokio::test]
    async fn test_evaluation_is_traced() {
        let reasoner = Arc::new(ScriptedReasoner::default());
        reasoner.push_evaluation(draft(0.3));
        let evidence: EvidenceSet = vec![chunk("a.pdf", 1, 0.5)].into_iter().collect();
        let mut trace = ReasoningTrace::new();

        let evaluation = Evaluator::new(reasoner, RetryPolicy::immediate(3))
            .evaluate(&question("What does it cost?"), &evidence, &mut trace)
            .await
            .unwrap();

        assert!(!evaluation.is_sufficient);
        assert_eq!(trace.len(), 1);
        assert_eq!(trace.entries()[0].step, StepName::Evaluation);
    }

    #[tokio::test]
    async fn test_failure_surfaces_as_evaluation_error() {
        let reasoner = Arc::new(ScriptedReasoner::default());
        reasoner.fail_evaluate(vec![CollaboratorError::malformed("missing is_sufficient")]);

        let err = Evaluator::new(reasoner.clone(), RetryPolicy::immediate(3))
            .evaluate(&question("q"), &EvidenceSet::new(), &mut ReasoningTrace::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Evaluation { .. }));
        assert_eq!(reasoner.evaluate_calls(), 1);
    }
}
