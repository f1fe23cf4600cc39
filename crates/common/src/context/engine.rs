//! Refinement engine - Sequences plan, retrieve/evaluate loop, and synthesis
//!
//! One call to [`Engine::process_query`] owns its evidence, trace and
//! iteration counters; nothing mutable is shared between concurrent queries.

use super::collaborators::{EvidenceStore, HistoryProvider, ReasoningCapability};
use super::evaluator::Evaluator;
use super::planner::{Planner, PlannerConfig};
use super::refinement::{RefinementConfig, RefinementLoop};
use super::retriever::Retriever;
use super::synthesizer::Synthesizer;
use super::trace::ReasoningTrace;
use super::types::{Answer, ConversationTurn, Plan, Question, RefinementResult};
use crate::config::EngineConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::resilience::RetryPolicy;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Caller-side identity of the conversation a question belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: Uuid,
}

impl SessionContext {
    pub fn new(session_id: Uuid) -> Self {
        Self { session_id }
    }
}

/// Everything produced while answering one question
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub query_id: Uuid,
    pub question: Question,
    pub plan: Plan,
    pub refinement: RefinementResult,
    pub answer: Answer,
    pub trace: ReasoningTrace,
    pub duration_ms: u64,
}

pub struct Engine {
    planner: Planner,
    refinement: RefinementLoop,
    synthesizer: Synthesizer,
    history: Arc<dyn HistoryProvider>,
    retry: RetryPolicy,
    max_history_turns: usize,
}

impl Engine {
    /// Build an engine, rejecting configurations the loop cannot honour
    pub fn new(
        config: &EngineConfig,
        capability: Arc<dyn ReasoningCapability>,
        store: Arc<dyn EvidenceStore>,
        history: Arc<dyn HistoryProvider>,
    ) -> Result<Self> {
        Self::with_retry(
            config,
            RetryPolicy::from_config(&config.retry),
            capability,
            store,
            history,
        )
    }

    pub fn with_retry(
        config: &EngineConfig,
        retry: RetryPolicy,
        capability: Arc<dyn ReasoningCapability>,
        store: Arc<dyn EvidenceStore>,
        history: Arc<dyn HistoryProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let planner = Planner::new(
            Arc::clone(&capability),
            retry.clone(),
            PlannerConfig::from(config),
        );
        let refinement = RefinementLoop::new(
            Retriever::new(store, retry.clone()),
            Evaluator::new(Arc::clone(&capability), retry.clone()),
            RefinementConfig::from(config),
        );
        let synthesizer = Synthesizer::new(capability, retry.clone());

        Ok(Self {
            planner,
            refinement,
            synthesizer,
            history,
            retry,
            max_history_turns: config.max_history_turns,
        })
    }

    /// Answer `raw_question` from documents in the `scope` collection
    pub async fn process_query(
        &self,
        session: &SessionContext,
        raw_question: &str,
        scope: Uuid,
    ) -> Result<QueryOutcome> {
        let query_id = Uuid::now_v7();
        let span = info_span!(
            "process_query",
            %query_id,
            session_id = %session.session_id,
            %scope
        );
        let start = Instant::now();

        let result = self
            .run(query_id, session, raw_question, scope, start)
            .instrument(span)
            .await;

        let elapsed = start.elapsed().as_secs_f64();
        match &result {
            Ok(outcome) => metrics::record_query(
                elapsed,
                outcome.refinement.termination_reason.as_str(),
                outcome.refinement.iteration_count(),
                outcome.refinement.evidence.len(),
            ),
            Err(err) => {
                metrics::record_query(elapsed, "error", 0, 0);
                if let Some(step) = failed_step(err) {
                    metrics::record_step_failure(step);
                }
            }
        }

        result
    }

    async fn run(
        &self,
        query_id: Uuid,
        session: &SessionContext,
        raw_question: &str,
        scope: Uuid,
        start: Instant,
    ) -> Result<QueryOutcome> {
        let raw = raw_question.trim();
        if raw.is_empty() {
            return Err(AppError::invalid_input("question must not be empty"));
        }

        let mut trace = ReasoningTrace::new();
        let history = self.load_history(session).await;

        let plan = self.planner.plan(&history, raw, &mut trace).await?;
        let refinement = self
            .refinement
            .run(
                &plan.question,
                plan.search_requests.clone(),
                scope,
                &mut trace,
            )
            .await?;
        let answer = self
            .synthesizer
            .synthesize(&plan.question, &refinement.evidence, &mut trace)
            .await?;

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            iterations = refinement.iteration_count(),
            evidence = refinement.evidence.len(),
            citations = answer.citations.len(),
            reason = refinement.termination_reason.as_str(),
            duration_ms,
            "Query answered"
        );

        Ok(QueryOutcome {
            query_id,
            question: plan.question.clone(),
            plan,
            refinement,
            answer,
            trace,
            duration_ms,
        })
    }

    /// Recent turns for the session; unavailable history means no history
    async fn load_history(&self, session: &SessionContext) -> Vec<ConversationTurn> {
        let history = &self.history;
        let limit = self.max_history_turns;
        match self
            .retry
            .run("history", || {
                history.recent_turns(session.session_id, limit)
            })
            .await
        {
            Ok(turns) => turns,
            Err(err) => {
                warn!(
                    session_id = %session.session_id,
                    error = %err,
                    "Conversation history unavailable, continuing without it"
                );
                Vec::new()
            }
        }
    }
}

/// Metric label for the step an error aborted
fn failed_step(err: &AppError) -> Option<&'static str> {
    match err {
        AppError::Planning { .. } => Some("planning"),
        AppError::Retrieval { .. } => Some("retrieval"),
        AppError::Evaluation { .. } => Some("evaluation"),
        AppError::Synthesis { .. } => Some("synthesis"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::synthesizer::INSUFFICIENT_INFORMATION_ANSWER;
    use crate::context::testing::{
        chunk, evaluation, plan_draft, turn, MapEvidenceStore, ScriptedReasoner, StaticHistory,
    };
    use crate::context::trace::StepName;
    use crate::context::types::TerminationReason;
    use crate::errors::CollaboratorError;

    struct Harness {
        reasoner: Arc<ScriptedReasoner>,
        store: Arc<MapEvidenceStore>,
        history: Arc<StaticHistory>,
        engine: Engine,
    }

    fn harness(reasoner: ScriptedReasoner, store: MapEvidenceStore, history: StaticHistory) -> Harness {
        let reasoner = Arc::new(reasoner);
        let store = Arc::new(store);
        let history = Arc::new(history);
        let engine = Engine::with_retry(
            &EngineConfig::default(),
            RetryPolicy::immediate(3),
            reasoner.clone(),
            store.clone(),
            history.clone(),
        )
        .unwrap();
        Harness {
            reasoner,
            store,
            history,
            engine,
        }
    }

    fn session() -> SessionContext {
        SessionContext::new(Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_never_confident_runs_three_iterations() {
        let reasoner = ScriptedReasoner::new(plan_draft("q", "explanation", &["initial"]));
        let mut round = 0;
        reasoner.always_evaluate_with(move || {
            round += 1;
            evaluation(false, 0.5, &[format!("angle {}", round).as_str()])
        });
        let store = MapEvidenceStore::new()
            .with("initial", vec![chunk("a.pdf", 1, 0.4)])
            .with("angle 1", vec![chunk("a.pdf", 2, 0.5)])
            .with("angle 2", vec![chunk("b.pdf", 1, 0.6)]);
        let h = harness(reasoner, store, StaticHistory::default());

        let outcome = h.engine.process_query(&session(), "why?", Uuid::nil()).await.unwrap();

        assert_eq!(outcome.refinement.iteration_count(), 3);
        assert_eq!(
            outcome.refinement.termination_reason,
            TerminationReason::MaxIterationsReached
        );
        let totals: Vec<usize> = outcome
            .refinement
            .iterations
            .iter()
            .map(|r| r.evidence_total)
            .collect();
        assert_eq!(totals, vec![1, 2, 3]);
        assert_eq!(h.reasoner.synthesize_calls(), 1);
    }

    #[tokio::test]
    async fn test_sufficient_first_pass_is_one_iteration() {
        let reasoner = ScriptedReasoner::new(plan_draft("q", "definition", &["initial"]));
        reasoner.push_evaluation(evaluation(true, 0.2, &["ignored"]));
        let store = MapEvidenceStore::new().with("initial", vec![chunk("a.pdf", 1, 0.4)]);
        let h = harness(reasoner, store, StaticHistory::default());

        let outcome = h.engine.process_query(&session(), "what?", Uuid::nil()).await.unwrap();

        assert_eq!(outcome.refinement.iteration_count(), 1);
        assert_eq!(outcome.refinement.termination_reason, TerminationReason::Sufficient);
        assert_eq!(h.store.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_no_followups_stops_after_first_iteration() {
        let reasoner = ScriptedReasoner::new(plan_draft("q", "other", &["initial"]));
        reasoner.push_evaluation(evaluation(false, 0.5, &[]));
        let store = MapEvidenceStore::new().with("initial", vec![chunk("a.pdf", 1, 0.4)]);
        let h = harness(reasoner, store, StaticHistory::default());

        let outcome = h.engine.process_query(&session(), "what?", Uuid::nil()).await.unwrap();

        assert_eq!(outcome.refinement.iteration_count(), 1);
        assert_eq!(
            outcome.refinement.termination_reason,
            TerminationReason::MaxIterationsReached
        );
    }

    #[tokio::test]
    async fn test_empty_evidence_yields_insufficient_information_answer() {
        let reasoner = ScriptedReasoner::new(plan_draft("q", "other", &["nothing", "nada"]));
        reasoner.push_evaluation(evaluation(false, 0.0, &[]));
        let h = harness(reasoner, MapEvidenceStore::new(), StaticHistory::default());

        let outcome = h.engine.process_query(&session(), "what?", Uuid::nil()).await.unwrap();

        assert!(outcome.answer.insufficient_information);
        assert_eq!(outcome.answer.text, INSUFFICIENT_INFORMATION_ANSWER);
        assert!(outcome.refinement.evidence.is_empty());
        assert_eq!(h.reasoner.synthesize_calls(), 0);
    }

    #[tokio::test]
    async fn test_compare_scenario() {
        let reasoner = ScriptedReasoner::new(plan_draft(
            "Compare X and Y",
            "comparison",
            &["X overview", "Y overview"],
        ));
        reasoner.push_evaluation(evaluation(true, 0.85, &[]));

        let shared = chunk("xy.pdf", 4, 0.7);
        let store = MapEvidenceStore::new()
            .with("X overview", vec![chunk("x.pdf", 1, 0.9), shared.clone()])
            .with("Y overview", vec![chunk("y.pdf", 2, 0.8), shared]);
        let h = harness(reasoner, store, StaticHistory::default());

        let scope = Uuid::new_v4();
        let outcome = h
            .engine
            .process_query(&session(), "Compare X and Y", scope)
            .await
            .unwrap();

        assert_eq!(outcome.plan.search_requests.len(), 2);
        assert_eq!(outcome.refinement.iteration_count(), 1);
        assert_eq!(outcome.refinement.evidence.len(), 3);
        assert!(outcome.answer.citations.len() <= 3);
        assert_eq!(outcome.refinement.termination_reason, TerminationReason::Sufficient);
        assert!(h.store.scopes_seen().iter().all(|s| *s == scope));

        let steps: Vec<StepName> = outcome.trace.entries().iter().map(|e| e.step).collect();
        assert_eq!(steps.first(), Some(&StepName::Planning));
        assert_eq!(steps.last(), Some(&StepName::Synthesis));
        assert_eq!(outcome.trace.for_step(StepName::Retrieval).count(), 2);
    }

    #[tokio::test]
    async fn test_blank_question_touches_no_collaborator() {
        let h = harness(
            ScriptedReasoner::default(),
            MapEvidenceStore::new(),
            StaticHistory::default(),
        );

        let err = h.engine.process_query(&session(), " \t ", Uuid::nil()).await.unwrap_err();

        assert!(matches!(err, AppError::InvalidInput { .. }));
        assert_eq!(h.history.calls(), 0);
        assert_eq!(h.reasoner.plan_calls(), 0);
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_failure_degrades() {
        let history = StaticHistory::new(vec![
            turn("first", "a"),
            turn("second", "b"),
            turn("third", "c"),
        ]);
        let h = harness(ScriptedReasoner::default(), MapEvidenceStore::new(), history);
        h.engine.process_query(&session(), "and it?", Uuid::nil()).await.unwrap();
        let seen = h.reasoner.last_history();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].question, "second");

        let h = harness(
            ScriptedReasoner::default(),
            MapEvidenceStore::new(),
            StaticHistory::unavailable(),
        );
        let outcome = h.engine.process_query(&session(), "and it?", Uuid::nil()).await;
        assert!(outcome.is_ok());
        assert!(h.reasoner.last_history().is_empty());
    }

    #[tokio::test]
    async fn test_planning_failure_aborts_before_retrieval() {
        let reasoner = ScriptedReasoner::default();
        reasoner.fail_plan(vec![CollaboratorError::malformed("not json")]);
        let h = harness(reasoner, MapEvidenceStore::new(), StaticHistory::default());

        let err = h.engine.process_query(&session(), "what?", Uuid::nil()).await.unwrap_err();

        assert!(matches!(err, AppError::Planning { .. }));
        assert_eq!(h.store.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_all_searches_failing_is_retrieval_error() {
        let reasoner = ScriptedReasoner::new(plan_draft("q", "other", &["down"]));
        let store = MapEvidenceStore::new().failing("down", CollaboratorError::permanent("gone"));
        let h = harness(reasoner, store, StaticHistory::default());

        let err = h.engine.process_query(&session(), "what?", Uuid::nil()).await.unwrap_err();

        assert!(matches!(err, AppError::Retrieval { .. }));
        assert_eq!(h.reasoner.evaluate_calls(), 0);
    }

    #[tokio::test]
    async fn test_partial_search_failure_still_answers() {
        let reasoner = ScriptedReasoner::new(plan_draft("q", "other", &["down", "up"]));
        reasoner.push_evaluation(evaluation(true, 0.8, &[]));
        let store = MapEvidenceStore::new()
            .failing("down", CollaboratorError::transient("timeout"))
            .with("up", vec![chunk("a.pdf", 1, 0.4)]);
        let h = harness(reasoner, store, StaticHistory::default());

        let outcome = h.engine.process_query(&session(), "what?", Uuid::nil()).await.unwrap();

        assert_eq!(outcome.refinement.evidence.len(), 1);
        assert!(!outcome.answer.insufficient_information);
    }

    #[tokio::test]
    async fn test_evaluation_failure_aborts() {
        let reasoner = ScriptedReasoner::new(plan_draft("q", "other", &["initial"]));
        reasoner.fail_evaluate(vec![CollaboratorError::permanent("401")]);
        let h = harness(reasoner, MapEvidenceStore::new(), StaticHistory::default());

        let err = h.engine.process_query(&session(), "what?", Uuid::nil()).await.unwrap_err();

        assert!(matches!(err, AppError::Evaluation { .. }));
        assert_eq!(h.reasoner.synthesize_calls(), 0);
    }

    #[tokio::test]
    async fn test_synthesis_transient_failures_exhaust_retries() {
        let reasoner = ScriptedReasoner::new(plan_draft("q", "other", &["initial"]));
        reasoner.fail_synthesize(vec![
            CollaboratorError::transient("429"),
            CollaboratorError::transient("429"),
            CollaboratorError::transient("429"),
        ]);
        let store = MapEvidenceStore::new().with("initial", vec![chunk("a.pdf", 1, 0.4)]);
        let h = harness(reasoner, store, StaticHistory::default());

        let err = h.engine.process_query(&session(), "what?", Uuid::nil()).await.unwrap_err();

        assert!(matches!(err, AppError::Synthesis { .. }));
        assert!(err.is_retryable());
        assert_eq!(h.reasoner.synthesize_calls(), 3);
    }

    #[tokio::test]
    async fn test_transient_synthesis_failure_recovers() {
        let reasoner = ScriptedReasoner::new(plan_draft("q", "other", &["initial"]));
        reasoner.fail_synthesize(vec![CollaboratorError::transient("timeout")]);
        let store = MapEvidenceStore::new().with("initial", vec![chunk("a.pdf", 1, 0.4)]);
        let h = harness(reasoner, store, StaticHistory::default());

        let outcome = h.engine.process_query(&session(), "what?", Uuid::nil()).await.unwrap();

        assert_eq!(h.reasoner.synthesize_calls(), 2);
        assert_eq!(outcome.answer.citations.len(), 1);
        assert!(outcome.answer.citations[0].cited);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = EngineConfig {
            max_iterations: 0,
            ..EngineConfig::default()
        };
        let result = Engine::new(
            &config,
            Arc::new(ScriptedReasoner::default()),
            Arc::new(MapEvidenceStore::new()),
            Arc::new(StaticHistory::default()),
        );
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }
}
