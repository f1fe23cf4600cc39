//! Retriever - Runs search requests and merges results into one evidence set

use super::collaborators::EvidenceStore;
use super::trace::{ReasoningTrace, StepName};
use super::types::{EvidenceSet, SearchRequest};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::resilience::RetryPolicy;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Retriever step
pub struct Retriever {
    store: Arc<dyn EvidenceStore>,
    retry: RetryPolicy,
}

impl Retriever {
    pub fn new(store: Arc<dyn EvidenceStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Execute every request against `scope` and return the merged evidence.
    ///
    /// Requests run concurrently, but results are merged and traced in
    /// request order, so ties resolve the same way on every run. A request
    /// that still fails after retries is recorded and skipped; only when all
    /// of them fail is the call an error.
    pub async fn retrieve(
        &self,
        requests: &[SearchRequest],
        scope: Uuid,
        trace: &mut ReasoningTrace,
    ) -> Result<EvidenceSet> {
        let mut evidence = EvidenceSet::new();
        if requests.is_empty() {
            return Ok(evidence);
        }

        let store = &self.store;
        let results = join_all(requests.iter().map(|request| {
            self.retry
                .run("search", move || store.search(request, scope))
        }))
        .await;

        let mut failures = Vec::new();

        for (request, result) in requests.iter().zip(results) {
            metrics::record_search(result.is_ok());
            match result {
                Ok(items) => {
                    let returned = items.len();
                    let added = evidence.extend(items);
                    debug!(query = %request.query, returned, added, "Search completed");
                    trace.record_with(
                        StepName::Retrieval,
                        format!(
                            "Searched \"{}\" (top_k={}): {} result(s), {} new",
                            request.query, request.top_k, returned, added
                        ),
                        json!({
                            "query": request.query,
                            "top_k": request.top_k,
                            "results": returned,
                            "added": added,
                        }),
                    );
                }
                Err(err) => {
                    warn!(query = %request.query, error = %err, "Search failed");
                    trace.record_with(
                        StepName::Retrieval,
                        format!("Search \"{}\" failed: {}", request.query, err),
                        json!({
                            "query": request.query,
                            "top_k": request.top_k,
                            "error": err.to_string(),
                        }),
                    );
                    failures.push(err);
                }
            }
        }

        if failures.len() == requests.len() {
            return Err(AppError::Retrieval {
                message: format!(
                    "all {} search request(s) failed; last error: {}",
                    requests.len(),
                    failures
                        .last()
                        .map(|e| e.to_string())
                        .unwrap_or_default()
                ),
            });
        }

        Ok(evidence)
    }
}
