//! Collection handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;
use docsage_common::{db::models::Document, db::Repository, errors::Result};

#[derive(Debug, Serialize)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub file_name: String,
    pub page_count: i32,
    pub chunk_count: i32,
    pub status: String,
    pub created_at: String,
}

impl From<Document> for DocumentSummary {
    fn from(document: Document) -> Self {
        Self {
            id: document.id,
            file_name: document.file_name,
            page_count: document.page_count,
            chunk_count: document.chunk_count,
            status: document.status,
            created_at: document.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CollectionDocumentsResponse {
    pub collection_id: Uuid,
    pub documents: Vec<DocumentSummary>,
    pub total: usize,
}

/// List the documents a collection scope covers
pub async fn list_documents(
    State(state): State<AppState>,
    Path(collection_id): Path<Uuid>,
) -> Result<Json<CollectionDocumentsResponse>> {
    let repo = Repository::new(state.db.clone());
    let documents: Vec<DocumentSummary> = repo
        .list_collection_documents(collection_id)
        .await?
        .into_iter()
        .map(DocumentSummary::from)
        .collect();

    tracing::debug!(%collection_id, count = documents.len(), "Listed collection documents");

    Ok(Json(CollectionDocumentsResponse {
        collection_id,
        total: documents.len(),
        documents,
    }))
}
