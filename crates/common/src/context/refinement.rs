//! Refinement loop - Retrieve, evaluate, and refine until the evidence holds
//!
//! The loop is an explicit state machine:
//!
//! ```text
//! INIT -> RETRIEVING -> EVALUATING -> REFINING -> RETRIEVING ...
//!                                  \-> DONE
//! ```
//!
//! Guarantees:
//! - At most `max_iterations` retrieve/evaluate iterations
//! - The evidence set never shrinks
//! - Each iteration produces exactly one evaluation

use super::evaluator::Evaluator;
use super::retriever::Retriever;
use super::trace::{ReasoningTrace, StepName};
use super::types::{
    Evaluation, EvidenceSet, IterationRecord, Question, RefinementResult, SearchRequest,
    TerminationReason,
};
use crate::config::{ContinuationPolicy, EngineConfig};
use crate::errors::{AppError, Result};
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

/// Refinement loop configuration
#[derive(Debug, Clone)]
pub struct RefinementConfig {
    pub max_iterations: usize,
    pub min_confidence_threshold: f32,
    pub max_followups_per_iteration: usize,
    /// top_k for follow-up searches
    pub followup_top_k: usize,
    pub continuation_policy: ContinuationPolicy,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RefinementConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_iterations: config.max_iterations.max(1),
            min_confidence_threshold: config.min_confidence_threshold,
            max_followups_per_iteration: config.max_followups_per_iteration,
            followup_top_k: config.default_top_k,
            continuation_policy: config.continuation_policy,
        }
    }
}

#[derive(Debug)]
enum LoopState {
    Init(Vec<SearchRequest>),
    Retrieving(Vec<SearchRequest>),
    Evaluating { queries: Vec<String>, added: usize },
    Refining,
    Done(TerminationReason),
}

/// Mutable state of one loop execution
struct LoopContext {
    iteration: usize,
    evidence: EvidenceSet,
    evaluations: Vec<Evaluation>,
    iterations: Vec<IterationRecord>,
    /// Lowercased queries already sent to the store
    issued: HashSet<String>,
}

impl LoopContext {
    fn new() -> Self {
        Self {
            iteration: 0,
            evidence: EvidenceSet::new(),
            evaluations: Vec::new(),
            iterations: Vec::new(),
            issued: HashSet::new(),
        }
    }

    fn note_issued(&mut self, requests: &[SearchRequest]) {
        self.issued
            .extend(requests.iter().map(|r| r.query.trim().to_lowercase()));
    }
}

pub struct RefinementLoop {
    retriever: Retriever,
    evaluator: Evaluator,
    config: RefinementConfig,
}

impl RefinementLoop {
    pub fn new(retriever: Retriever, evaluator: Evaluator, config: RefinementConfig) -> Self {
        Self {
            retriever,
            evaluator,
            config,
        }
    }

    /// Drive the loop from the planner's initial requests to a terminal result
    pub async fn run(
        &self,
        question: &Question,
        initial_requests: Vec<SearchRequest>,
        scope: Uuid,
        trace: &mut ReasoningTrace,
    ) -> Result<RefinementResult> {
        let mut ctx = LoopContext::new();
        let mut state = LoopState::Init(initial_requests);

        let reason = loop {
            state = match state {
                LoopState::Init(requests) => {
                    ctx.iteration = 1;
                    LoopState::Retrieving(requests)
                }

                LoopState::Retrieving(requests) => {
                    ctx.note_issued(&requests);
                    let found = self.retriever.retrieve(&requests, scope, trace).await?;
                    let added = ctx.evidence.merge(found);
                    debug!(
                        iteration = ctx.iteration,
                        added,
                        total = ctx.evidence.len(),
                        "Merged evidence"
                    );
                    LoopState::Evaluating {
                        queries: requests.into_iter().map(|r| r.query).collect(),
                        added,
                    }
                }

                LoopState::Evaluating { queries, added } => {
                    let evaluation = self
                        .evaluator
                        .evaluate(question, &ctx.evidence, trace)
                        .await?;

                    ctx.iterations.push(IterationRecord {
                        iteration: ctx.iteration,
                        queries_issued: queries,
                        evidence_added: added,
                        evidence_total: ctx.evidence.len(),
                        confidence: evaluation.confidence,
                        is_sufficient: evaluation.is_sufficient,
                    });

                    let next = self.decide(&evaluation, ctx.iteration);
                    ctx.evaluations.push(evaluation);
                    next
                }

                LoopState::Refining => {
                    let followups = match ctx.evaluations.last() {
                        Some(evaluation) => self.followup_requests(evaluation, &ctx.issued),
                        None => Vec::new(),
                    };

                    if followups.is_empty() {
                        trace.record(
                            StepName::Refinement,
                            format!(
                                "No new follow-up queries after iteration {}; stopping",
                                ctx.iteration
                            ),
                        );
                        LoopState::Done(TerminationReason::MaxIterationsReached)
                    } else {
                        ctx.iteration += 1;
                        trace.record_with(
                            StepName::Refinement,
                            format!(
                                "Starting iteration {} with {} follow-up search(es)",
                                ctx.iteration,
                                followups.len()
                            ),
                            json!({
                                "iteration": ctx.iteration,
                                "queries": followups,
                            }),
                        );
                        LoopState::Retrieving(followups)
                    }
                }

                LoopState::Done(reason) => break reason,
            };
        };

        let evaluation = ctx
            .evaluations
            .last()
            .cloned()
            .ok_or_else(|| AppError::Internal {
                message: "refinement loop finished without an evaluation".to_string(),
            })?;

        trace.record_with(
            StepName::Refinement,
            format!(
                "Stopped after {} iteration(s): {}",
                ctx.iteration,
                reason.as_str()
            ),
            json!({
                "iterations": ctx.iteration,
                "termination_reason": reason,
                "evidence_total": ctx.evidence.len(),
            }),
        );

        info!(
            iterations = ctx.iteration,
            evidence = ctx.evidence.len(),
            confidence = evaluation.confidence,
            reason = reason.as_str(),
            "Refinement finished"
        );

        Ok(RefinementResult {
            evidence: ctx.evidence,
            evaluation,
            evaluations: ctx.evaluations,
            iterations: ctx.iterations,
            termination_reason: reason,
        })
    }

    /// Transition out of EVALUATING
    fn decide(&self, evaluation: &Evaluation, iteration: usize) -> LoopState {
        let confident = evaluation.confidence >= self.config.min_confidence_threshold;
        if !self
            .config
            .continuation_policy
            .should_continue(confident, evaluation.is_sufficient)
        {
            LoopState::Done(TerminationReason::Sufficient)
        } else if iteration >= self.config.max_iterations {
            LoopState::Done(TerminationReason::MaxIterationsReached)
        } else {
            LoopState::Refining
        }
    }

    /// Searches for the evaluator's suggestions that have not been issued yet
    fn followup_requests(
        &self,
        evaluation: &Evaluation,
        issued: &HashSet<String>,
    ) -> Vec<SearchRequest> {
        let mut seen = HashSet::new();
        evaluation
            .suggested_followups
            .iter()
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .filter(|q| {
                let key = q.to_lowercase();
                !issued.contains(&key) && seen.insert(key)
            })
            .take(self.config.max_followups_per_iteration)
            .map(|q| SearchRequest::new(q, self.config.followup_top_k))
            .collect()
    }
}
