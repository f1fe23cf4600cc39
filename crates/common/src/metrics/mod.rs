//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for HTTP traffic and the refinement engine
//! with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all DocSage metrics
pub const METRICS_PREFIX: &str = "docsage";

/// Buckets for end-to-end query latency (LLM bound, so seconds not millis)
pub const QUERY_BUCKETS: &[f64] = &[
    0.5,   // 500ms
    1.0,   // 1s
    2.0,   // 2s
    5.0,   // 5s
    10.0,  // 10s
    20.0,  // 20s
    30.0,  // 30s
    60.0,  // 1m
    120.0, // 2m
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total questions processed, labelled by outcome"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end question processing latency in seconds"
    );

    describe_histogram!(
        format!("{}_refinement_iterations", METRICS_PREFIX),
        Unit::Count,
        "Retrieve/evaluate iterations per question"
    );

    describe_histogram!(
        format!("{}_evidence_items", METRICS_PREFIX),
        Unit::Count,
        "Evidence items in the final set per question"
    );

    describe_counter!(
        format!("{}_search_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Evidence store searches, labelled by status"
    );

    describe_counter!(
        format!("{}_step_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Reasoning step failures that aborted a question"
    );

    describe_counter!(
        format!("{}_collaborator_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Retries of transient collaborator failures"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record a completed (or aborted) question
pub fn record_query(duration_secs: f64, outcome: &str, iterations: usize, evidence_count: usize) {
    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(format!("{}_query_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    if iterations > 0 {
        histogram!(format!("{}_refinement_iterations", METRICS_PREFIX)).record(iterations as f64);
        histogram!(format!("{}_evidence_items", METRICS_PREFIX)).record(evidence_count as f64);
    }
}

/// Record one evidence store search
pub fn record_search(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        format!("{}_search_requests_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);
}

/// Record a step failure that aborted a question
pub fn record_step_failure(step: &str) {
    counter!(
        format!("{}_step_failures_total", METRICS_PREFIX),
        "step" => step.to_string()
    )
    .increment(1);
}

/// Record one retry of a collaborator call
pub fn record_retry(operation: &str) {
    counter!(
        format!("{}_collaborator_retries_total", METRICS_PREFIX),
        "operation" => operation.to_string()
    )
    .increment(1);
}
