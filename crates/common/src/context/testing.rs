//! In-memory collaborators for exercising the reasoning steps and the engine

use super::collaborators::{
    EvaluationDraft, EvidenceStore, HistoryProvider, PlanDraft, ReasoningCapability,
    SearchQueryDraft,
};
use super::types::{ConversationTurn, EvidenceItem, EvidenceSet, Question, QuestionType, SearchRequest};
use crate::errors::CollaboratorError;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Chunk with a fresh id; chunks from the same document name share a document id
pub fn chunk(document_name: &str, page_number: i32, relevance_score: f32) -> EvidenceItem {
    let mut hasher = DefaultHasher::new();
    document_name.hash(&mut hasher);
    EvidenceItem {
        chunk_id: Uuid::new_v4(),
        document_id: Uuid::from_u128(u128::from(hasher.finish())),
        document_name: document_name.to_string(),
        page_number,
        text: format!("{} page {} excerpt", document_name, page_number),
        relevance_score,
    }
}

pub fn question(text: &str) -> Question {
    Question {
        raw: text.to_string(),
        resolved: text.to_string(),
        question_type: QuestionType::Other,
    }
}

pub fn turn(question: &str, answer: &str) -> ConversationTurn {
    ConversationTurn {
        question: question.to_string(),
        answer: answer.to_string(),
        timestamp: None,
    }
}

pub fn evaluation(is_sufficient: bool, confidence: f64, followups: &[&str]) -> EvaluationDraft {
    EvaluationDraft {
        is_sufficient,
        confidence,
        missing_aspects: Vec::new(),
        suggested_followups: followups.iter().map(|f| f.to_string()).collect(),
    }
}

pub fn plan_draft(resolved: &str, question_type: &str, queries: &[&str]) -> PlanDraft {
    PlanDraft {
        resolved_question: resolved.to_string(),
        question_type: question_type.to_string(),
        search_queries: queries
            .iter()
            .map(|q| SearchQueryDraft {
                query: q.to_string(),
                top_k: Some(5),
            })
            .collect(),
        max_searches: None,
        resolved_references: Vec::new(),
    }
}

type EvaluationScript = Box<dyn FnMut() -> EvaluationDraft + Send>;

/// Reasoning capability driven by queued responses and injected failures.
///
/// Evaluations are served in push order; the last one keeps being served
/// once the queue is down to it. Failures are consumed before any response.
pub struct ScriptedReasoner {
    plan: Mutex<PlanDraft>,
    evaluations: Mutex<VecDeque<EvaluationDraft>>,
    evaluation_script: Mutex<Option<EvaluationScript>>,
    answer: Mutex<String>,

    plan_failures: Mutex<VecDeque<CollaboratorError>>,
    evaluate_failures: Mutex<VecDeque<CollaboratorError>>,
    synthesize_failures: Mutex<VecDeque<CollaboratorError>>,

    plan_calls: AtomicUsize,
    evaluate_calls: AtomicUsize,
    synthesize_calls: AtomicUsize,
    last_history: Mutex<Vec<ConversationTurn>>,
}

impl Default for ScriptedReasoner {
    fn default() -> Self {
        Self::new(plan_draft("", "other", &[]))
    }
}

impl ScriptedReasoner {
    pub fn new(plan: PlanDraft) -> Self {
        Self {
            plan: Mutex::new(plan),
            evaluations: Mutex::new(VecDeque::new()),
            evaluation_script: Mutex::new(None),
            answer: Mutex::new("The documents agree on this [1].".to_string()),
            plan_failures: Mutex::new(VecDeque::new()),
            evaluate_failures: Mutex::new(VecDeque::new()),
            synthesize_failures: Mutex::new(VecDeque::new()),
            plan_calls: AtomicUsize::new(0),
            evaluate_calls: AtomicUsize::new(0),
            synthesize_calls: AtomicUsize::new(0),
            last_history: Mutex::new(Vec::new()),
        }
    }

    pub fn push_evaluation(&self, draft: EvaluationDraft) {
        self.evaluations.lock().unwrap().push_back(draft);
    }

    /// Produce every evaluation from `script`
    pub fn always_evaluate_with<F>(&self, script: F)
    where
        F: FnMut() -> EvaluationDraft + Send + 'static,
    {
        *self.evaluation_script.lock().unwrap() = Some(Box::new(script));
    }

    pub fn set_answer(&self, text: &str) {
        *self.answer.lock().unwrap() = text.to_string();
    }

    pub fn fail_plan(&self, errors: Vec<CollaboratorError>) {
        self.plan_failures.lock().unwrap().extend(errors);
    }

    pub fn fail_evaluate(&self, errors: Vec<CollaboratorError>) {
        self.evaluate_failures.lock().unwrap().extend(errors);
    }

    pub fn fail_synthesize(&self, errors: Vec<CollaboratorError>) {
        self.synthesize_failures.lock().unwrap().extend(errors);
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls.load(Ordering::SeqCst)
    }

    pub fn evaluate_calls(&self) -> usize {
        self.evaluate_calls.load(Ordering::SeqCst)
    }

    pub fn synthesize_calls(&self) -> usize {
        self.synthesize_calls.load(Ordering::SeqCst)
    }

    pub fn last_history(&self) -> Vec<ConversationTurn> {
        self.last_history.lock().unwrap().clone()
    }

    fn next_evaluation(&self) -> EvaluationDraft {
        if let Some(script) = self.evaluation_script.lock().unwrap().as_mut() {
            return script();
        }
        let mut queue = self.evaluations.lock().unwrap();
        match queue.len() {
            0 => evaluation(true, 0.9, &[]),
            1 => queue[0].clone(),
            _ => queue.pop_front().unwrap_or_else(|| evaluation(true, 0.9, &[])),
        }
    }
}

#[async_trait]
impl ReasoningCapability for ScriptedReasoner {
    async fn plan(
        &self,
        _question: &str,
        history: &[ConversationTurn],
    ) -> Result<PlanDraft, CollaboratorError> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_history.lock().unwrap() = history.to_vec();
        if let Some(err) = self.plan_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.plan.lock().unwrap().clone())
    }

    async fn evaluate(
        &self,
        _question: &Question,
        _evidence: &EvidenceSet,
    ) -> Result<EvaluationDraft, CollaboratorError> {
        self.evaluate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.evaluate_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.next_evaluation())
    }

    async fn synthesize(
        &self,
        _question: &Question,
        _evidence: &EvidenceSet,
    ) -> Result<String, CollaboratorError> {
        self.synthesize_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.synthesize_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.answer.lock().unwrap().clone())
    }
}

/// Evidence store answering exact queries from a fixed map; unknown queries find nothing
#[derive(Default)]
pub struct MapEvidenceStore {
    results: HashMap<String, Result<Vec<EvidenceItem>, CollaboratorError>>,
    calls: AtomicUsize,
    scopes: Mutex<Vec<Uuid>>,
}

impl MapEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, query: &str, items: Vec<EvidenceItem>) -> Self {
        self.results.insert(query.to_string(), Ok(items));
        self
    }

    pub fn failing(mut self, query: &str, error: CollaboratorError) -> Self {
        self.results.insert(query.to_string(), Err(error));
        self
    }

    pub fn search_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn scopes_seen(&self) -> Vec<Uuid> {
        self.scopes.lock().unwrap().clone()
    }
}

#[async_trait]
impl EvidenceStore for MapEvidenceStore {
    async fn search(
        &self,
        request: &SearchRequest,
        scope: Uuid,
    ) -> Result<Vec<EvidenceItem>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.scopes.lock().unwrap().push(scope);
        match self.results.get(&request.query) {
            Some(Ok(items)) => Ok(items.iter().take(request.top_k).cloned().collect()),
            Some(Err(err)) => Err(err.clone()),
            None => Ok(Vec::new()),
        }
    }
}

/// Fixed conversation history, optionally unavailable
#[derive(Default)]
pub struct StaticHistory {
    turns: Vec<ConversationTurn>,
    unavailable: bool,
    calls: AtomicUsize,
}

impl StaticHistory {
    pub fn new(turns: Vec<ConversationTurn>) -> Self {
        Self {
            turns,
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistoryProvider for StaticHistory {
    async fn recent_turns(
        &self,
        _session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(CollaboratorError::permanent("session store offline"));
        }
        let skip = self.turns.len().saturating_sub(limit);
        Ok(self.turns[skip..].to_vec())
    }
}
