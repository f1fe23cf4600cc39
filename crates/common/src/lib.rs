//! DocSage Common Library
//!
//! Shared code for the DocSage services including:
//! - The refinement engine (plan, retrieve, evaluate, synthesize)
//! - Language model and embedding clients
//! - Database models and the pgvector evidence store
//! - Redis session storage
//! - Error types, configuration, retry policy and metrics

pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod resilience;

// Re-export commonly used types
pub use cache::{ChatSession, SessionStore};
pub use config::AppConfig;
pub use context::{Engine, QueryOutcome, SessionContext};
pub use db::{ChunkResult, DbPool, PgEvidenceStore, Repository};
pub use embeddings::Embedder;
pub use errors::{AppError, CollaboratorError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
