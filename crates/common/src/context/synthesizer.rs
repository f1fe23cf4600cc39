//! Synthesizer - Generates the grounded answer and its citations
//!
//! Provides:
//! - Context-grounded answer generation
//! - Page-level citation list built from the evidence alone
//! - Cross-check of `[n]` / `[Source n]` markers against the evidence

use super::collaborators::ReasoningCapability;
use super::trace::{ReasoningTrace, StepName};
use super::types::{Answer, Citation, EvidenceSet, Question};
use crate::errors::{AppError, CollaboratorError, Result};
use crate::resilience::RetryPolicy;
use regex_lite::Regex;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Answer returned when there is no evidence to ground one in
pub const INSUFFICIENT_INFORMATION_ANSWER: &str =
    "I don't have enough information in the provided documents to answer this question.";

/// Synthesizer step
pub struct Synthesizer {
    capability: Arc<dyn ReasoningCapability>,
    retry: RetryPolicy,
}

impl Synthesizer {
    pub fn new(capability: Arc<dyn ReasoningCapability>, retry: RetryPolicy) -> Self {
        Self { capability, retry }
    }

    pub async fn synthesize(
        &self,
        question: &Question,
        evidence: &EvidenceSet,
        trace: &mut ReasoningTrace,
    ) -> Result<Answer> {
        if evidence.is_empty() {
            trace.record(
                StepName::Synthesis,
                "No evidence found; returning the insufficient-information answer",
            );
            info!("Synthesis skipped, evidence is empty");
            return Ok(Answer {
                text: INSUFFICIENT_INFORMATION_ANSWER.to_string(),
                citations: Vec::new(),
                insufficient_information: true,
                unresolved_markers: Vec::new(),
            });
        }

        let text = self
            .retry
            .run("synthesize", || async {
                let text = self.capability.synthesize(question, evidence).await?;
                match text.trim() {
                    "" => Err(CollaboratorError::malformed("empty answer text")),
                    trimmed => Ok(trimmed.to_string()),
                }
            })
            .await
            .map_err(|source| AppError::Synthesis { source })?;

        let mut citations = build_citations(evidence);
        let markers = source_markers(&text);
        let unresolved = mark_cited(&mut citations, evidence, &markers);

        if !unresolved.is_empty() {
            warn!(markers = ?unresolved, "Answer cites sources that are not in the evidence");
        }

        trace.record_with(
            StepName::Synthesis,
            format!(
                "Generated answer from {} chunk(s) with {} page citation(s)",
                evidence.len(),
                citations.len()
            ),
            json!({
                "answer_chars": text.len(),
                "citations": citations.len(),
                "cited": citations.iter().filter(|c| c.cited).count(),
                "unresolved_markers": unresolved,
            }),
        );

        Ok(Answer {
            text,
            citations,
            insufficient_information: false,
            unresolved_markers: unresolved,
        })
    }
}

/// One citation per `(document_id, page_number)`, in first-seen evidence order.
///
/// A pure function of the evidence, so the citation set for unchanged
/// evidence is stable across runs.
pub fn build_citations(evidence: &EvidenceSet) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    let mut by_page: HashMap<(Uuid, i32), usize> = HashMap::new();

    for item in evidence.iter() {
        let key = (item.document_id, item.page_number);
        match by_page.get(&key) {
            Some(&idx) => {
                let citation = &mut citations[idx];
                citation.chunk_ids.push(item.chunk_id);
                citation.relevance_score = citation.relevance_score.max(item.relevance_score);
            }
            None => {
                by_page.insert(key, citations.len());
                citations.push(Citation {
                    document_id: item.document_id,
                    document_name: item.document_name.clone(),
                    page_number: item.page_number,
                    chunk_ids: vec![item.chunk_id],
                    relevance_score: item.relevance_score,
                    cited: false,
                });
            }
        }
    }

    citations
}

fn marker_regex() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER
        .get_or_init(|| Regex::new(r"\[(?:[Ss]ource\s+)?(\d+)\]").ok())
        .as_ref()
}

/// Distinct 1-based source numbers referenced in the text
fn source_markers(text: &str) -> BTreeSet<usize> {
    let Some(regex) = marker_regex() else {
        return BTreeSet::new();
    };
    regex
        .captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .collect()
}

/// Flag citations whose chunks the answer points at; return markers with no match
fn mark_cited(
    citations: &mut [Citation],
    evidence: &EvidenceSet,
    markers: &BTreeSet<usize>,
) -> Vec<usize> {
    let mut unresolved = Vec::new();

    for &marker in markers {
        let Some(item) = marker.checked_sub(1).and_then(|i| evidence.items().get(i)) else {
            unresolved.push(marker);
            continue;
        };
        if let Some(citation) = citations
            .iter_mut()
            .find(|c| c.chunk_ids.contains(&item.chunk_id))
        {
            citation.cited = true;
        }
    }

    unresolved
}
