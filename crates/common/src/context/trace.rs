//! Append-only reasoning trace for one question

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Step that produced a trace entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Planning,
    Retrieval,
    Evaluation,
    Refinement,
    Synthesis,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEntry {
    pub step: StepName,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

/// Entries in execution order. There is no way to edit or drop one.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ReasoningTrace {
    entries: Vec<TraceEntry>,
}

impl ReasoningTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: StepName, description: impl Into<String>) {
        self.record_with(step, description, serde_json::Value::Null);
    }

    pub fn record_with(
        &mut self,
        step: StepName,
        description: impl Into<String>,
        data: serde_json::Value,
    ) {
        let description = description.into();
        tracing::debug!(step = ?step, %description, "Reasoning step");
        self.entries.push(TraceEntry {
            step,
            description,
            timestamp: Utc::now(),
            data,
        });
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries produced by one step, in order
    pub fn for_step(&self, step: StepName) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter().filter(move |e| e.step == step)
    }
}
