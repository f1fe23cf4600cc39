//! Evidence store over pgvector: embed the query, then search the collection

use super::repository::{ChunkResult, Repository};
use crate::context::{EvidenceItem, EvidenceStore, SearchRequest};
use crate::embeddings::Embedder;
use crate::errors::CollaboratorError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct PgEvidenceStore {
    repo: Repository,
    embedder: Arc<dyn Embedder>,
}

impl PgEvidenceStore {
    pub fn new(repo: Repository, embedder: Arc<dyn Embedder>) -> Self {
        Self { repo, embedder }
    }
}

#[async_trait]
impl EvidenceStore for PgEvidenceStore {
    async fn search(
        &self,
        request: &SearchRequest,
        scope: Uuid,
    ) -> Result<Vec<EvidenceItem>, CollaboratorError> {
        let embedding = self.embedder.embed(&request.query).await?;

        // Pool exhaustion and dropped connections clear up on their own
        let rows = self
            .repo
            .vector_search(&embedding, request.top_k, scope)
            .await
            .map_err(|e| CollaboratorError::transient(e.to_string()))?;

        debug!(
            query = %request.query,
            %scope,
            results = rows.len(),
            "Vector search completed"
        );

        Ok(rows.into_iter().map(to_evidence).collect())
    }
}

fn to_evidence(row: ChunkResult) -> EvidenceItem {
    EvidenceItem {
        chunk_id: row.chunk_id,
        document_id: row.document_id,
        document_name: row.document_name,
        page_number: row.page_number,
        text: row.content,
        relevance_score: row.score.clamp(-1.0, 1.0) as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_maps_to_evidence() {
        let row = ChunkResult {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            document_name: "handbook.pdf".to_string(),
            page_number: 12,
            content: "Leases renew every 30 days.".to_string(),
            score: 0.8125,
        };
        let item = to_evidence(row.clone());
        assert_eq!(item.chunk_id, row.chunk_id);
        assert_eq!(item.document_name, "handbook.pdf");
        assert_eq!(item.page_number, 12);
        assert_eq!(item.relevance_score, 0.8125);
    }
}
