//! Refinement engine core
//!
//! Answers a question over a document collection by sequencing four steps:
//! - Planning: reference resolution, classification, search planning
//! - Retrieval: scoped similarity search with evidence dedup
//! - Evaluation: sufficiency verdict and follow-up suggestions
//! - Synthesis: grounded answer with page-level citations
//!
//! Retrieval and evaluation repeat inside a bounded refinement loop while
//! the evidence stays weak.

mod collaborators;
mod engine;
mod evaluator;
mod planner;
mod refinement;
mod retriever;
mod synthesizer;
mod trace;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use collaborators::{
    EvaluationDraft, EvidenceStore, HistoryProvider, PlanDraft, ReasoningCapability,
    SearchQueryDraft,
};
pub use engine::{Engine, QueryOutcome, SessionContext};
pub use evaluator::Evaluator;
pub use planner::{Planner, PlannerConfig};
pub use refinement::{RefinementConfig, RefinementLoop};
pub use retriever::Retriever;
pub use synthesizer::{build_citations, Synthesizer, INSUFFICIENT_INFORMATION_ANSWER};
pub use trace::{ReasoningTrace, StepName, TraceEntry};
pub use types::{
    Answer, Citation, ConversationTurn, Evaluation, EvidenceItem, EvidenceSet, IterationRecord,
    MergeOutcome, Plan, Question, QuestionType, RefinementResult, SearchRequest,
    TerminationReason,
};
