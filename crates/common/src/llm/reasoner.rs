//! Reasoning capability backed by a chat completions model

use super::prompts::{
    evaluator_message, planner_message, synthesizer_message, EVALUATOR_SYSTEM_PROMPT,
    PLANNER_SYSTEM_PROMPT, SYNTHESIZER_SYSTEM_PROMPT,
};
use super::{parse_json_response, LlmClient};
use crate::context::{
    ConversationTurn, EvaluationDraft, EvidenceSet, PlanDraft, Question, ReasoningCapability,
};
use crate::errors::CollaboratorError;
use async_trait::async_trait;

pub struct LlmReasoner {
    client: LlmClient,
}

impl LlmReasoner {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReasoningCapability for LlmReasoner {
    async fn plan(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<PlanDraft, CollaboratorError> {
        let raw = self
            .client
            .complete(PLANNER_SYSTEM_PROMPT, &planner_message(question, history), true)
            .await?;
        parse_json_response(&raw)
    }

    async fn evaluate(
        &self,
        question: &Question,
        evidence: &EvidenceSet,
    ) -> Result<EvaluationDraft, CollaboratorError> {
        let raw = self
            .client
            .complete(
                EVALUATOR_SYSTEM_PROMPT,
                &evaluator_message(question, evidence),
                true,
            )
            .await?;
        parse_json_response(&raw)
    }

    async fn synthesize(
        &self,
        question: &Question,
        evidence: &EvidenceSet,
    ) -> Result<String, CollaboratorError> {
        self.client
            .complete(
                SYNTHESIZER_SYSTEM_PROMPT,
                &synthesizer_message(question, evidence),
                false,
            )
            .await
    }
}
