//! Data model shared by the reasoning steps and the refinement loop

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use uuid::Uuid;

/// Classified question type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Definition,
    Comparison,
    ProsCons,
    Explanation,
    Procedural,
    Other,
}

impl QuestionType {
    /// Map a free-form label onto the fixed set; anything unknown is `Other`
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' || c == '/' { '_' } else { c })
            .collect();

        match normalized.as_str() {
            "definition" => QuestionType::Definition,
            "comparison" | "compare" => QuestionType::Comparison,
            "pros_cons" | "pros_and_cons" => QuestionType::ProsCons,
            "explanation" | "explain" => QuestionType::Explanation,
            "procedural" | "procedure" | "how_to" => QuestionType::Procedural,
            _ => QuestionType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Definition => "definition",
            QuestionType::Comparison => "comparison",
            QuestionType::ProsCons => "pros_cons",
            QuestionType::Explanation => "explanation",
            QuestionType::Procedural => "procedural",
            QuestionType::Other => "other",
        }
    }
}

/// A user question after reference resolution and classification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    /// Question as the user typed it (trimmed)
    pub raw: String,

    /// Question with "it"/"this"/"that" replaced by what they refer to
    pub resolved: String,

    pub question_type: QuestionType,
}

/// One search to run against the evidence store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            top_k,
        }
    }
}

/// A prior question/answer pair from the same session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A retrieved chunk of document text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    /// Display name of the source document (file name)
    pub document_name: String,
    pub page_number: i32,
    pub text: String,
    pub relevance_score: f32,
}

/// What happened to an item offered to an [`EvidenceSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New chunk, appended
    Added,
    /// Known chunk with a higher score, replaced in place
    Replaced,
    /// Known chunk with an equal or lower score, dropped
    Discarded,
}

/// Insertion-ordered evidence, unique by chunk id.
///
/// When a chunk arrives twice the higher relevance score wins and the
/// item keeps the position of its first arrival. Items are never removed.
#[derive(Debug, Clone, Default)]
pub struct EvidenceSet {
    items: Vec<EvidenceItem>,
    positions: HashMap<Uuid, usize>,
}

impl EvidenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvidenceItem> {
        self.items.iter()
    }

    pub fn items(&self) -> &[EvidenceItem] {
        &self.items
    }

    pub fn get(&self, chunk_id: &Uuid) -> Option<&EvidenceItem> {
        self.positions.get(chunk_id).map(|&idx| &self.items[idx])
    }

    pub fn contains(&self, chunk_id: &Uuid) -> bool {
        self.positions.contains_key(chunk_id)
    }

    /// Offer one item to the set
    pub fn insert(&mut self, item: EvidenceItem) -> MergeOutcome {
        match self.positions.get(&item.chunk_id) {
            Some(&idx) => {
                if item.relevance_score > self.items[idx].relevance_score {
                    self.items[idx] = item;
                    MergeOutcome::Replaced
                } else {
                    MergeOutcome::Discarded
                }
            }
            None => {
                self.positions.insert(item.chunk_id, self.items.len());
                self.items.push(item);
                MergeOutcome::Added
            }
        }
    }

    /// Merge a batch of items, returning how many new chunks were added
    pub fn extend<I>(&mut self, items: I) -> usize
    where
        I: IntoIterator<Item = EvidenceItem>,
    {
        items
            .into_iter()
            .map(|item| self.insert(item))
            .filter(|outcome| *outcome == MergeOutcome::Added)
            .count()
    }

    /// Merge another set into this one, returning how many new chunks were added
    pub fn merge(&mut self, other: EvidenceSet) -> usize {
        self.extend(other.items)
    }
}

impl Serialize for EvidenceSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.items)
    }
}

impl FromIterator<EvidenceItem> for EvidenceSet {
    fn from_iter<I: IntoIterator<Item = EvidenceItem>>(iter: I) -> Self {
        let mut set = EvidenceSet::new();
        set.extend(iter);
        set
    }
}

/// Sufficiency judgement over the evidence gathered so far
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub is_sufficient: bool,
    /// Always within [0, 1]
    pub confidence: f32,
    pub missing_aspects: Vec<String>,
    pub suggested_followups: Vec<String>,
}

/// Output of the planner step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub question: Question,
    pub search_requests: Vec<SearchRequest>,
}

/// One page-level source backing an answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub document_id: Uuid,
    pub document_name: String,
    pub page_number: i32,
    /// Chunks from this page present in the evidence
    pub chunk_ids: Vec<Uuid>,
    /// Best relevance score among those chunks
    pub relevance_score: f32,
    /// Whether the answer text points at one of those chunks
    pub cited: bool,
}

/// Final answer for a question
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    /// True when the evidence was empty and no generation happened
    pub insufficient_information: bool,
    /// Source markers in the text that match no evidence item
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved_markers: Vec<usize>,
}

/// Why the refinement loop stopped
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Sufficient,
    MaxIterationsReached,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Sufficient => "sufficient",
            TerminationReason::MaxIterationsReached => "max_iterations_reached",
        }
    }
}

/// Summary of one retrieve/evaluate iteration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IterationRecord {
    /// 1-based
    pub iteration: usize,
    pub queries_issued: Vec<String>,
    /// Chunks that were new to the evidence set
    pub evidence_added: usize,
    /// Evidence set size after this iteration
    pub evidence_total: usize,
    pub confidence: f32,
    pub is_sufficient: bool,
}

/// Terminal output of the refinement loop
#[derive(Debug, Clone, Serialize)]
pub struct RefinementResult {
    pub evidence: EvidenceSet,
    /// Authoritative (last) evaluation
    pub evaluation: Evaluation,
    /// Every evaluation, in iteration order
    pub evaluations: Vec<Evaluation>,
    pub iterations: Vec<IterationRecord>,
    pub termination_reason: TerminationReason,
}

impl RefinementResult {
    pub fn iteration_count(&self) -> usize {
        self.iterations.len()
    }
}
