//! Repository pattern for database operations
//!
//! Provides a clean interface for the data access the engine needs:
//! collection-scoped similarity search and document listing.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::Result;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, QueryFilter,
    QueryOrder, Statement,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result from search operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub document_name: String,
    pub page_number: i32,
    pub content: String,
    /// Cosine similarity, higher is closer
    pub score: f64,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    // ========================================================================
    // Document Operations
    // ========================================================================

    /// Documents uploaded to a collection, oldest first
    pub async fn list_collection_documents(&self, collection_id: Uuid) -> Result<Vec<Document>> {
        DocumentEntity::find()
            .filter(DocumentColumn::CollectionId.eq(collection_id))
            .order_by_asc(DocumentColumn::CreatedAt)
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Search Operations
    // ========================================================================

    /// Vector similarity search restricted to one collection
    pub async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
        collection_id: Uuid,
    ) -> Result<Vec<ChunkResult>> {
        let sql = r#"
            SELECT
                c.id AS chunk_id,
                c.document_id,
                d.file_name AS document_name,
                c.page_number,
                c.content,
                (1 - (c.embedding <=> $1::vector))::float8 AS score
            FROM chunks c
            JOIN documents d ON c.document_id = d.id
            WHERE c.embedding IS NOT NULL
              AND d.collection_id = $3
            ORDER BY c.embedding <=> $1::vector
            LIMIT $2
        "#;

        let values: Vec<sea_orm::Value> = vec![
            to_pgvector_literal(embedding).into(),
            (limit.min(i32::MAX as usize) as i32).into(),
            collection_id.into(),
        ];

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, values);

        let results = self
            .conn()
            .query_all(stmt)
            .await?
            .into_iter()
            .filter_map(|row| {
                Some(ChunkResult {
                    chunk_id: row.try_get_by_index::<Uuid>(0).ok()?,
                    document_id: row.try_get_by_index::<Uuid>(1).ok()?,
                    document_name: row.try_get_by_index::<String>(2).ok()?,
                    page_number: row.try_get_by_index::<i32>(3).ok()?,
                    content: row.try_get_by_index::<String>(4).ok()?,
                    score: row.try_get_by_index::<f64>(5).ok()?,
                })
            })
            .collect();

        Ok(results)
    }
}

/// pgvector text form: "[1,2.5,-0.25]"
pub(crate) fn to_pgvector_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pgvector_literal() {
        assert_eq!(to_pgvector_literal(&[1.0, 2.5, -0.25]), "[1,2.5,-0.25]");
        assert_eq!(to_pgvector_literal(&[]), "[]");
    }
}
