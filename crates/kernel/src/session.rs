//! Session storage: the Redis-backed layer, an in-memory layer, and the
//! key/value seam the form engine reads and writes through.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fred::prelude::*;
use parking_lot::Mutex;
use serde_json::Value;
use tower_sessions::cookie::SameSite;
use tower_sessions::cookie::time::Duration;
use tower_sessions::{Expiry, MemoryStore, Session, SessionManagerLayer};
use tower_sessions_redis_store::RedisStore;

/// Default session expiry (24 hours).
pub const DEFAULT_SESSION_EXPIRY_HOURS: i64 = 24;

/// Key/value access to the current user's session.
///
/// Values are stored as JSON so that any backend can hold them.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Read a value.
    async fn get_value(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one.
    async fn set_value(&self, key: &str, value: Value) -> Result<()>;

    /// Delete a value. Missing keys are not an error.
    async fn remove_value(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl SessionStorage for Session {
    async fn get_value(&self, key: &str) -> Result<Option<Value>> {
        Session::get::<Value>(self, key)
            .await
            .map_err(|e| anyhow::anyhow!("failed to read session key {key}: {e}"))
    }

    async fn set_value(&self, key: &str, value: Value) -> Result<()> {
        Session::insert(self, key, value)
            .await
            .map_err(|e| anyhow::anyhow!("failed to write session key {key}: {e}"))
    }

    async fn remove_value(&self, key: &str) -> Result<()> {
        Session::remove::<Value>(self, key)
            .await
            .map_err(|e| anyhow::anyhow!("failed to remove session key {key}: {e}"))?;
        Ok(())
    }
}

/// Process-local session storage, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemorySession {
    values: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemorySession {
    /// Create an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.values.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl SessionStorage for MemorySession {
    async fn get_value(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: Value) -> Result<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_value(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// Parse the `COOKIE_SAME_SITE` setting. Unknown values fall back to strict.
pub fn parse_same_site(value: &str) -> SameSite {
    match value.to_ascii_lowercase().as_str() {
        "lax" => SameSite::Lax,
        "none" => SameSite::None,
        _ => SameSite::Strict,
    }
}

/// Create the session layer using Redis as the backend.
pub async fn create_session_layer(
    redis_url: &str,
    same_site: SameSite,
    secure: bool,
) -> Result<SessionManagerLayer<RedisStore<Pool>>> {
    let config = Config::from_url(redis_url).context("failed to parse Redis URL")?;

    let pool = Builder::from_config(config)
        .build_pool(1)
        .context("failed to create Redis pool")?;

    pool.init()
        .await
        .context("failed to connect to Redis for sessions")?;

    let store = RedisStore::new(pool);

    Ok(SessionManagerLayer::new(store)
        .with_secure(secure)
        .with_http_only(true)
        .with_same_site(same_site)
        .with_expiry(Expiry::OnInactivity(Duration::hours(
            DEFAULT_SESSION_EXPIRY_HOURS,
        ))))
}

/// Create a session layer that keeps sessions in process memory.
pub fn memory_session_layer(same_site: SameSite, secure: bool) -> SessionManagerLayer<MemoryStore> {
    SessionManagerLayer::new(MemoryStore::default())
        .with_secure(secure)
        .with_http_only(true)
        .with_same_site(same_site)
        .with_expiry(Expiry::OnInactivity(Duration::hours(
            DEFAULT_SESSION_EXPIRY_HOURS,
        )))
}
