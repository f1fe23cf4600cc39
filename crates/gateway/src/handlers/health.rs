//! Health check handlers

use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use docsage_common::errors::Result;
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: CheckResult,
    pub redis: CheckResult,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    fn is_up(&self) -> bool {
        self.status == "up"
    }
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: docsage_common::VERSION,
    })
}

/// Readiness probe - checks Postgres and Redis
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let (database, redis) = tokio::join!(
        check(state.db.ping()),
        check(state.sessions.ping()),
    );

    let all_healthy = database.is_up() && redis.is_up();
    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
            checks: HealthChecks { database, redis },
        }),
    )
}

async fn check<F>(probe: F) -> CheckResult
where
    F: Future<Output = Result<()>>,
{
    let start = Instant::now();
    match probe.await {
        Ok(()) => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsage_common::AppError;

    #[tokio::test]
    async fn test_check_reports_latency_when_up() {
        let result = check(async { Ok(()) }).await;
        assert!(result.is_up());
        assert!(result.latency_ms.is_some());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_check_reports_error_when_down() {
        let result = check(async {
            Err(AppError::CacheError {
                message: "connection refused".to_string(),
            })
        })
        .await;
        assert!(!result.is_up());
        assert!(result.latency_ms.is_none());
        assert!(result.error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_health_is_always_healthy() {
        let Json(body) = health().await;
        assert_eq!(body.status, "healthy");
    }
}
