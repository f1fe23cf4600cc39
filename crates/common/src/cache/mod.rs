//! Redis integration
//!
//! Provides:
//! - Connection management
//! - Generic JSON get/set operations with TTL
//! - Server-side scripts for atomic read-modify-write
//! - Chat session storage with conversation history

use crate::config::RedisConfig;
use crate::context::{ConversationTurn, HistoryProvider};
use crate::errors::{AppError, CollaboratorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Redis client
#[derive(Clone)]
pub struct Cache {
    connection: ConnectionManager,
    key_prefix: String,
}

impl Cache {
    /// Connect to Redis; the connection reconnects on its own after failures
    pub async fn new(url: &str, key_prefix: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection,
            key_prefix: key_prefix.to_string(),
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Get a value
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();

        let value: Option<String> = conn.get(&full_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to get key '{}': {}", full_key, e),
        })?;

        match value {
            Some(json) => {
                // A corrupt value is a Serialization error, not an outage
                let parsed = serde_json::from_str(&json)?;
                debug!(key = %full_key, "Cache hit");
                Ok(Some(parsed))
            }
            None => {
                debug!(key = %full_key, "Cache miss");
                Ok(None)
            }
        }
    }

    /// Set a value with a TTL
    pub async fn set_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        let full_key = self.key(key);
        let json = serde_json::to_string(value).map_err(|e| AppError::CacheError {
            message: format!("Failed to serialize value: {}", e),
        })?;

        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(&full_key, &json, ttl_secs)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, ttl_secs, "Cache set");
        Ok(())
    }

    /// Delete a key
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();

        let deleted: i32 = conn.del(&full_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to delete key '{}': {}", full_key, e),
        })?;

        debug!(key = %full_key, deleted = deleted > 0, "Cache delete");
        Ok(deleted > 0)
    }

    /// Reset a key's TTL; false when the key does not exist
    pub async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();

        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let updated: bool = conn.expire(&full_key, ttl).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to expire key '{}': {}", full_key, e),
        })?;

        Ok(updated)
    }

    /// Run a Lua script against a single key; `None` when the script returns nil
    pub async fn eval_on_key(
        &self,
        script: &Script,
        key: &str,
        args: &[String],
    ) -> Result<Option<String>> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();

        let mut invocation = script.prepare_invoke();
        invocation.key(&full_key);
        for arg in args {
            invocation.arg(arg);
        }

        let value: Option<String> =
            invocation
                .invoke_async(&mut conn)
                .await
                .map_err(|e| AppError::CacheError {
                    message: format!("Script on key '{}' failed: {}", full_key, e),
                })?;

        Ok(value)
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

/// Cache key builder helpers
pub mod keys {
    use uuid::Uuid;

    /// Build a session key
    pub fn session(session_id: Uuid) -> String {
        format!("session:{}", session_id)
    }
}

/// A chat session and its conversation so far
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSession {
    pub session_id: Uuid,
    pub user_id: String,
    /// Document collection searched by default for this session
    #[serde(default)]
    pub collection_id: Option<Uuid>,
    #[serde(default)]
    pub conversations: Vec<ConversationTurn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(user_id: impl Into<String>, collection_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id: user_id.into(),
            collection_id,
            conversations: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The last `limit` turns, oldest first
    pub fn recent_turns(&self, limit: usize) -> &[ConversationTurn] {
        let skip = self.conversations.len().saturating_sub(limit);
        &self.conversations[skip..]
    }
}

/// Appends one turn to a stored session inside Redis, so concurrent appends
/// to the same session never overwrite each other.
///
/// KEYS[1] session key; ARGV[1] turn JSON; ARGV[2] updated_at; ARGV[3] TTL.
/// Returns the updated session JSON, or nil when the session is gone.
const APPEND_TURN_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
    return false
end
local session = cjson.decode(raw)
if type(session.conversations) ~= 'table' then
    session.conversations = {}
end
table.insert(session.conversations, cjson.decode(ARGV[1]))
session.updated_at = ARGV[2]
local encoded = cjson.encode(session)
redis.call('SET', KEYS[1], encoded, 'EX', tonumber(ARGV[3]))
return encoded
"#;

fn append_turn_script() -> &'static Script {
    static SCRIPT: OnceLock<Script> = OnceLock::new();
    SCRIPT.get_or_init(|| Script::new(APPEND_TURN_SCRIPT))
}

/// Script arguments for appending a turn at `now`
fn append_turn_args(
    question: &str,
    answer: &str,
    now: DateTime<Utc>,
    ttl_secs: u64,
) -> Result<Vec<String>> {
    let turn = ConversationTurn {
        question: question.to_string(),
        answer: answer.to_string(),
        timestamp: Some(now),
    };

    Ok(vec![
        serde_json::to_string(&turn)?,
        now.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        ttl_secs.to_string(),
    ])
}

/// Session persistence with a sliding TTL
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<Cache>,
    ttl_secs: u64,
}

impl SessionStore {
    pub fn new(cache: Arc<Cache>, ttl_secs: u64) -> Self {
        Self { cache, ttl_secs }
    }

    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let cache = Cache::new(&config.url, &config.key_prefix).await?;
        Ok(Self::new(Arc::new(cache), config.session_ttl_secs))
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub async fn ping(&self) -> Result<()> {
        self.cache.ping().await
    }

    pub async fn create_session(
        &self,
        user_id: &str,
        collection_id: Option<Uuid>,
    ) -> Result<ChatSession> {
        let session = ChatSession::new(user_id, collection_id);
        self.save(&session).await?;
        info!(session_id = %session.session_id, user_id, "Session created");
        Ok(session)
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<ChatSession>> {
        self.cache.get(&keys::session(session_id)).await
    }

    /// Record a question/answer pair and refresh the TTL, atomically
    pub async fn append_turn(
        &self,
        session_id: Uuid,
        question: &str,
        answer: &str,
    ) -> Result<ChatSession> {
        let args = append_turn_args(question, answer, Utc::now(), self.ttl_secs)?;

        let raw = self
            .cache
            .eval_on_key(append_turn_script(), &keys::session(session_id), &args)
            .await?
            .ok_or_else(|| AppError::SessionNotFound {
                id: session_id.to_string(),
            })?;
        let session: ChatSession = serde_json::from_str(&raw)?;

        debug!(%session_id, turns = session.conversations.len(), "Turn appended");
        Ok(session)
    }

    pub async fn delete_session(&self, session_id: Uuid) -> Result<bool> {
        let deleted = self.cache.delete(&keys::session(session_id)).await?;
        if deleted {
            info!(%session_id, "Session deleted");
        }
        Ok(deleted)
    }

    /// Push the expiry out by one TTL; false when the session is gone
    pub async fn extend_session(&self, session_id: Uuid) -> Result<bool> {
        self.cache
            .expire(&keys::session(session_id), self.ttl_secs)
            .await
    }

    async fn save(&self, session: &ChatSession) -> Result<()> {
        self.cache
            .set_with_ttl(&keys::session(session.session_id), session, self.ttl_secs)
            .await
    }
}

#[async_trait]
impl HistoryProvider for SessionStore {
    async fn recent_turns(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> std::result::Result<Vec<ConversationTurn>, CollaboratorError> {
        let session = self.get_session(session_id).await.map_err(history_error)?;

        Ok(session
            .map(|s| s.recent_turns(limit).to_vec())
            .unwrap_or_default())
    }
}

/// A corrupt stored session is final; anything else may clear up on retry
fn history_error(err: AppError) -> CollaboratorError {
    match err {
        AppError::Serialization(_) => CollaboratorError::malformed(err.to_string()),
        _ => CollaboratorError::transient(err.to_string()),
    }
}
