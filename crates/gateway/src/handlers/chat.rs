//! Chat session and question answering handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use docsage_common::{
    context::{
        Citation, Evaluation, IterationRecord, Question, ReasoningTrace, SearchRequest,
        TerminationReason,
    },
    errors::{AppError, Result},
    ChatSession, QueryOutcome, SessionContext,
};

/// Start chat request
#[derive(Debug, Deserialize, Validate)]
pub struct StartChatRequest {
    #[validate(length(min = 1, max = 256))]
    pub user_id: String,

    /// Collection searched when a query names none
    #[serde(default)]
    pub collection_id: Option<Uuid>,
}

/// Start chat response
#[derive(Debug, Serialize)]
pub struct StartChatResponse {
    pub session_id: Uuid,
    pub user_id: String,
    pub collection_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_in_seconds: u64,
    pub message: String,
}

/// Chat query request
#[derive(Debug, Deserialize, Validate)]
pub struct ChatQueryRequest {
    pub session_id: Uuid,

    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    /// Must match the session's collection when the session has one
    #[serde(default)]
    pub collection_id: Option<Uuid>,

    #[serde(default)]
    pub include_trace: bool,
}

/// Chat query response
#[derive(Debug, Serialize)]
pub struct ChatQueryResponse {
    pub query_id: Uuid,
    pub session_id: Uuid,
    pub collection_id: Uuid,
    pub question: Question,
    pub answer: String,
    pub insufficient_information: bool,
    pub citations: Vec<Citation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unresolved_markers: Vec<usize>,
    pub termination_reason: TerminationReason,
    pub iterations: Vec<IterationRecord>,
    pub evaluation: Evaluation,
    pub plan: PlanSummary,
    pub evidence_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<ReasoningTrace>,
    pub session_updated: bool,
    pub processing_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct PlanSummary {
    pub question_type: String,
    pub resolved_question: String,
    pub search_requests: Vec<SearchRequest>,
}

/// Create a new chat session
pub async fn start_chat(
    State(state): State<AppState>,
    Json(request): Json<StartChatRequest>,
) -> Result<(StatusCode, Json<StartChatResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let user_id = request.user_id.trim();
    if user_id.is_empty() {
        return Err(AppError::Validation {
            message: "user_id cannot be blank".to_string(),
            field: Some("user_id".to_string()),
        });
    }

    let session = state
        .sessions
        .create_session(user_id, request.collection_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(StartChatResponse {
            session_id: session.session_id,
            user_id: session.user_id,
            collection_id: session.collection_id,
            created_at: session.created_at,
            expires_in_seconds: state.sessions.ttl_secs(),
            message: "Chat session created successfully".to_string(),
        }),
    ))
}

/// Get a session with its conversation history
pub async fn get_chat(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ChatSession>> {
    let session = state
        .sessions
        .get_session(session_id)
        .await?
        .ok_or_else(|| AppError::SessionNotFound {
            id: session_id.to_string(),
        })?;

    Ok(Json(session))
}

/// End a session
pub async fn delete_chat(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode> {
    if state.sessions.delete_session(session_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::SessionNotFound {
            id: session_id.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ExtendChatResponse {
    pub session_id: Uuid,
    pub expires_in_seconds: u64,
}

/// Keep an idle session alive for another TTL
pub async fn extend_chat(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ExtendChatResponse>> {
    if !state.sessions.extend_session(session_id).await? {
        return Err(AppError::SessionNotFound {
            id: session_id.to_string(),
        });
    }

    tracing::debug!(%session_id, "Session extended");

    Ok(Json(ExtendChatResponse {
        session_id,
        expires_in_seconds: state.sessions.ttl_secs(),
    }))
}

/// Answer a question within a session
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<ChatQueryRequest>,
) -> Result<Json<ChatQueryResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let session = state
        .sessions
        .get_session(request.session_id)
        .await?
        .ok_or_else(|| AppError::SessionNotFound {
            id: request.session_id.to_string(),
        })?;

    let scope = resolve_scope(request.collection_id, &session)?;

    tracing::info!(
        session_id = %session.session_id,
        collection_id = %scope,
        "Processing chat query"
    );

    let outcome = state
        .engine
        .process_query(
            &SessionContext::new(session.session_id),
            &request.query,
            scope,
        )
        .await?;

    let session_updated = match state
        .sessions
        .append_turn(session.session_id, &outcome.question.raw, &outcome.answer.text)
        .await
    {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(
                session_id = %session.session_id,
                error = %e,
                "Failed to record conversation turn"
            );
            false
        }
    };

    Ok(Json(build_response(
        outcome,
        session.session_id,
        scope,
        request.include_trace,
        session_updated,
    )))
}

/// A session bound to a collection only ever searches that collection;
/// an unbound session takes the collection named by the request
fn resolve_scope(requested: Option<Uuid>, session: &ChatSession) -> Result<Uuid> {
    match (requested, session.collection_id) {
        (Some(requested), Some(bound)) if requested != bound => Err(AppError::ScopeMismatch {
            session_id: session.session_id.to_string(),
            collection_id: requested.to_string(),
        }),
        (_, Some(bound)) => Ok(bound),
        (Some(requested), None) => Ok(requested),
        (None, None) => Err(AppError::ScopeMissing {
            session_id: session.session_id.to_string(),
        }),
    }
}

fn build_response(
    outcome: QueryOutcome,
    session_id: Uuid,
    collection_id: Uuid,
    include_trace: bool,
    session_updated: bool,
) -> ChatQueryResponse {
    let QueryOutcome {
        query_id,
        question,
        plan,
        refinement,
        answer,
        trace,
        duration_ms,
    } = outcome;

    ChatQueryResponse {
        query_id,
        session_id,
        collection_id,
        plan: PlanSummary {
            question_type: question.question_type.as_str().to_string(),
            resolved_question: question.resolved.clone(),
            search_requests: plan.search_requests,
        },
        question,
        answer: answer.text,
        insufficient_information: answer.insufficient_information,
        citations: answer.citations,
        unresolved_markers: answer.unresolved_markers,
        termination_reason: refinement.termination_reason,
        evidence_count: refinement.evidence.len(),
        iterations: refinement.iterations,
        evaluation: refinement.evaluation,
        trace: include_trace.then_some(trace),
        session_updated,
        processing_time_ms: duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsage_common::context::{
        Answer, EvidenceItem, EvidenceSet, Plan, QuestionType, RefinementResult, StepName,
    };

    fn outcome() -> QueryOutcome {
        let question = Question {
            raw: "How long is its notice period?".to_string(),
            resolved: "How long is the lease notice period?".to_string(),
            question_type: QuestionType::Definition,
        };

        let mut evidence = EvidenceSet::new();
        evidence.insert(EvidenceItem {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            document_name: "lease.pdf".to_string(),
            page_number: 4,
            text: "Either party may terminate with 30 days notice.".to_string(),
            relevance_score: 0.82,
        });

        let evaluation = Evaluation {
            is_sufficient: true,
            confidence: 0.9,
            missing_aspects: Vec::new(),
            suggested_followups: Vec::new(),
        };

        let mut trace = ReasoningTrace::new();
        trace.record(StepName::Planning, "Planned 1 search");

        QueryOutcome {
            query_id: Uuid::now_v7(),
            plan: Plan {
                question: question.clone(),
                search_requests: vec![SearchRequest::new("lease notice period", 5)],
            },
            question,
            refinement: RefinementResult {
                evidence,
                evaluation: evaluation.clone(),
                evaluations: vec![evaluation],
                iterations: Vec::new(),
                termination_reason: TerminationReason::Sufficient,
            },
            answer: Answer {
                text: "The notice period is 30 days [Source 1].".to_string(),
                citations: Vec::new(),
                insufficient_information: false,
                unresolved_markers: vec![3],
            },
            trace,
            duration_ms: 1234,
        }
    }

    #[test]
    fn test_bound_session_keeps_its_collection() {
        let session_collection = Uuid::new_v4();
        let session = ChatSession::new("user-1", Some(session_collection));

        assert_eq!(resolve_scope(None, &session).unwrap(), session_collection);
        assert_eq!(
            resolve_scope(Some(session_collection), &session).unwrap(),
            session_collection
        );
    }

    #[test]
    fn test_other_collection_is_rejected_for_bound_session() {
        let session = ChatSession::new("user-1", Some(Uuid::new_v4()));
        let err = resolve_scope(Some(Uuid::new_v4()), &session).unwrap_err();

        assert!(matches!(err, AppError::ScopeMismatch { .. }));
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_unbound_session_uses_requested_collection() {
        let requested = Uuid::new_v4();
        let session = ChatSession::new("user-1", None);
        assert_eq!(resolve_scope(Some(requested), &session).unwrap(), requested);
    }

    #[test]
    fn test_missing_scope_is_rejected() {
        let session = ChatSession::new("user-1", None);
        let err = resolve_scope(None, &session).unwrap_err();
        assert!(matches!(err, AppError::ScopeMissing { .. }));
    }

    #[test]
    fn test_query_length_validation() {
        let request = |query: String| ChatQueryRequest {
            session_id: Uuid::new_v4(),
            query,
            collection_id: None,
            include_trace: false,
        };

        assert!(request(String::new()).validate().is_err());
        assert!(request("x".repeat(2001)).validate().is_err());
        tokio_test::assert_ok!(request("What is the notice period?".to_string()).validate());
    }

    #[test]
    fn test_query_request_defaults() {
        let request: ChatQueryRequest = serde_json::from_value(serde_json::json!({
            "session_id": Uuid::new_v4(),
            "query": "What is covered?"
        }))
        .unwrap();
        assert!(request.collection_id.is_none());
        assert!(!request.include_trace);
    }

    #[test]
    fn test_response_omits_trace_unless_requested() {
        let session_id = Uuid::new_v4();
        let scope = Uuid::new_v4();

        let response = build_response(outcome(), session_id, scope, false, true);
        assert!(response.trace.is_none());
        assert_eq!(response.evidence_count, 1);
        assert_eq!(response.processing_time_ms, 1234);
        assert_eq!(response.plan.question_type, "definition");
        assert_eq!(
            response.plan.resolved_question,
            "How long is the lease notice period?"
        );

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("trace").is_none());
        assert_eq!(json["termination_reason"], "sufficient");
        assert_eq!(json["unresolved_markers"][0], 3);
        assert_eq!(json["session_updated"], true);

        let traced = build_response(outcome(), session_id, scope, true, false);
        assert_eq!(traced.trace.as_ref().map(|t| t.len()), Some(1));
        assert!(!traced.session_updated);
    }
}
