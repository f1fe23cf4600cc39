//! System prompts and message builders for the three reasoning calls

use crate::context::{ConversationTurn, EvidenceSet, Question};

pub const PLANNER_SYSTEM_PROMPT: &str = r#"You plan document searches. You never answer the question and never see documents.

1. Rewrite the question so it stands alone: replace pronouns and vague references ("it", "this", "that approach") with what they refer to in the conversation history.
2. Classify the question as one of: definition, comparison, pros_cons, explanation, procedural, other.
3. Write the search queries needed to cover the question. Use as few as possible but enough for full coverage; a comparison usually needs one query per side. Pick top_k per query from how dense the relevant material is likely to be.

Reply with JSON only:
{
  "resolved_question": "...",
  "question_type": "definition | comparison | pros_cons | explanation | procedural | other",
  "search_queries": [{"query": "...", "top_k": 5}],
  "max_searches": 2,
  "resolved_references": ["'it' -> '...'"]
}"#;

pub const EVALUATOR_SYSTEM_PROMPT: &str = r#"You judge whether retrieved excerpts are enough to answer a question accurately and completely. You never answer the question.

Judge coverage (every aspect addressed), depth (enough detail), and confidence (answerable without guessing). The question type sets the bar:
- definition: the core concept is stated
- comparison: both sides, their differences and trade-offs
- pros_cons: advantages and disadvantages
- explanation: mechanism and reasoning
- procedural: the steps in order

When the excerpts fall short, list what is missing and suggest short search queries that would find it.

Reply with JSON only:
{
  "is_sufficient": false,
  "confidence_score": 0.0,
  "missing_aspects": [],
  "suggested_followups": []
}"#;

pub const SYNTHESIZER_SYSTEM_PROMPT: &str = r#"You answer questions using only the numbered document excerpts you are given.

- Every statement must come from the excerpts. Do not add outside knowledge.
- Cite the excerpts you use inline as [Source n].
- If the excerpts do not contain the answer, say so plainly.
- Structure the answer clearly and stay factual."#;

/// User message for the planner call
pub fn planner_message(question: &str, history: &[ConversationTurn]) -> String {
    let mut message = String::new();

    if history.is_empty() {
        message.push_str("Conversation history: none\n\n");
    } else {
        message.push_str("Conversation history (oldest first):\n");
        for (i, turn) in history.iter().enumerate() {
            message.push_str(&format!(
                "Turn {}\nUser: {}\nAssistant: {}\n\n",
                i + 1,
                turn.question,
                turn.answer
            ));
        }
    }

    message.push_str(&format!("Question: {}", question));
    message
}

/// User message for the evaluator call
pub fn evaluator_message(question: &Question, evidence: &EvidenceSet) -> String {
    format!(
        "Question: {}\nQuestion type: {}\n\nRetrieved excerpts:\n{}",
        question.resolved,
        question.question_type.as_str(),
        format_evidence(evidence)
    )
}

/// User message for the synthesizer call
pub fn synthesizer_message(question: &Question, evidence: &EvidenceSet) -> String {
    format!(
        "Excerpts:\n{}\nQuestion: {}\n\nAnswer using only the excerpts above and cite them as [Source n].",
        format_evidence(evidence),
        question.resolved
    )
}

/// Evidence as numbered blocks; numbering starts at 1 in set order
pub fn format_evidence(evidence: &EvidenceSet) -> String {
    if evidence.is_empty() {
        return "(no excerpts were found)\n".to_string();
    }

    evidence
        .iter()
        .enumerate()
        .map(|(i, item)| {
            format!(
                "[Source {}]\nDocument: {}\nPage: {}\nContent: {}\n",
                i + 1,
                item.document_name,
                item.page_number,
                item.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{EvidenceItem, QuestionType};
    use uuid::Uuid;

    #[test]
    fn test_evidence_is_numbered_from_one() {
        let evidence: EvidenceSet = ["first", "second"]
            .iter()
            .enumerate()
            .map(|(i, text)| EvidenceItem {
                chunk_id: Uuid::new_v4(),
                document_id: Uuid::nil(),
                document_name: "guide.pdf".to_string(),
                page_number: i as i32 + 1,
                text: text.to_string(),
                relevance_score: 0.5,
            })
            .collect();

        let formatted = format_evidence(&evidence);
        assert!(formatted.starts_with("[Source 1]\nDocument: guide.pdf\nPage: 1"));
        assert!(formatted.contains("[Source 2]"));
        assert!(formatted.contains("Content: second"));
    }

    #[test]
    fn test_planner_message_includes_history() {
        let history = vec![ConversationTurn {
            question: "What is Raft?".to_string(),
            answer: "A consensus protocol.".to_string(),
            timestamp: None,
        }];
        let message = planner_message("How does it elect a leader?", &history);
        assert!(message.contains("User: What is Raft?"));
        assert!(message.ends_with("Question: How does it elect a leader?"));

        assert!(planner_message("q", &[]).contains("history: none"));
    }

    #[test]
    fn test_evaluator_message_uses_resolved_question() {
        let question = Question {
            raw: "and it?".to_string(),
            resolved: "How does Raft elect a leader?".to_string(),
            question_type: QuestionType::Explanation,
        };
        let message = evaluator_message(&question, &EvidenceSet::new());
        assert!(message.starts_with("Question: How does Raft elect a leader?"));
        assert!(message.contains("Question type: explanation"));
        assert!(message.contains("no excerpts"));
    }
}
