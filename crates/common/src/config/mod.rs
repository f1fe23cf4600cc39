//! Configuration management for DocSage services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use crate::errors::AppError;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Refinement engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Postgres URL (pgvector extension required)
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Session lifetime in seconds, refreshed on every write
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL
    #[serde(default = "default_llm_api_base")]
    pub api_base: String,

    /// API key
    pub api_key: Option<String>,

    /// Chat model
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens in a completion
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

/// How the two evaluation signals combine when deciding to keep refining
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationPolicy {
    /// Refine only while confidence is below threshold AND the verdict is insufficient
    #[default]
    AllUnmet,
    /// Refine while confidence is below threshold OR the verdict is insufficient
    AnyUnmet,
}

impl ContinuationPolicy {
    /// Whether another refinement round is warranted by this evaluation
    pub fn should_continue(&self, confident: bool, sufficient: bool) -> bool {
        match self {
            ContinuationPolicy::AllUnmet => !confident && !sufficient,
            ContinuationPolicy::AnyUnmet => !confident || !sufficient,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Total attempts per collaborator call, including the first
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Upper bound on retrieve/evaluate iterations, including the first
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Confidence at or above which evidence counts as adequate
    #[serde(default = "default_min_confidence")]
    pub min_confidence_threshold: f32,

    /// Follow-up queries turned into searches per refinement round
    #[serde(default = "default_max_followups")]
    pub max_followups_per_iteration: usize,

    /// Conversation turns the planner may consult
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,

    /// Largest top_k a single search request may ask for
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// top_k for refinement searches and for planner entries without one
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Maximum search requests accepted from one plan
    #[serde(default = "default_max_search_requests")]
    pub max_search_requests: usize,

    #[serde(default)]
    pub continuation_policy: ContinuationPolicy,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 120 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_database_url() -> String { "postgres://localhost/docsage".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_session_ttl() -> u64 { 3600 }
fn default_key_prefix() -> String { "docsage".to_string() }
fn default_llm_api_base() -> String { "https://api.openai.com/v1".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_temperature() -> f32 { 0.3 }
fn default_llm_max_tokens() -> u32 { 2000 }
fn default_llm_timeout() -> u64 { 60 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_retry_attempts() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 500 }
fn default_max_backoff_ms() -> u64 { 8_000 }
fn default_backoff_multiplier() -> f64 { 2.0 }
fn default_max_iterations() -> usize { 3 }
fn default_min_confidence() -> f32 { 0.7 }
fn default_max_followups() -> usize { 2 }
fn default_max_history_turns() -> usize { 2 }
fn default_max_top_k() -> usize { 20 }
fn default_top_k() -> usize { 5 }
fn default_max_search_requests() -> usize { 5 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "docsage".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            session_ttl_secs: default_session_ttl(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: default_llm_api_base(),
            api_key: None,
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_llm_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            min_confidence_threshold: default_min_confidence(),
            max_followups_per_iteration: default_max_followups(),
            max_history_turns: default_max_history_turns(),
            max_top_k: default_max_top_k(),
            default_top_k: default_top_k(),
            max_search_requests: default_max_search_requests(),
            continuation_policy: ContinuationPolicy::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl EngineConfig {
    /// Reject settings under which the refinement loop has no sound meaning
    pub fn validate(&self) -> Result<(), AppError> {
        let invalid = |message: &str| AppError::Configuration {
            message: message.to_string(),
        };

        if self.max_iterations == 0 {
            return Err(invalid("engine.max_iterations must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence_threshold) {
            return Err(invalid("engine.min_confidence_threshold must lie in [0, 1]"));
        }
        if self.max_top_k == 0 {
            return Err(invalid("engine.max_top_k must be at least 1"));
        }
        if self.default_top_k == 0 || self.default_top_k > self.max_top_k {
            return Err(invalid("engine.default_top_k must lie in [1, max_top_k]"));
        }
        if self.max_search_requests == 0 {
            return Err(invalid("engine.max_search_requests must be at least 1"));
        }
        if self.max_followups_per_iteration == 0 {
            return Err(invalid("engine.max_followups_per_iteration must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("engine.retry.max_attempts must be at least 1"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(invalid("engine.retry.multiplier must be at least 1.0"));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__ENGINE__MAX_ITERATIONS=4
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            engine: EngineConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
