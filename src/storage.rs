// src/storage.rs
//! Durable key/value storage for session fields.
//!
//! The persisted contract is four string keys (`token`, `refresh_token`,
//! `user`, `authData`) so existing stored sessions stay readable across
//! client versions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

/// Storage keys making up the persisted session.
pub const KEY_TOKEN: &str = "token";
pub const KEY_REFRESH_TOKEN: &str = "refresh_token";
pub const KEY_USER: &str = "user";
pub const KEY_AUTH_DATA: &str = "authData";

pub const SESSION_KEYS: [&str; 4] = [KEY_TOKEN, KEY_REFRESH_TOKEN, KEY_USER, KEY_AUTH_DATA];

/// Key/value storage surviving process restarts. Values are opaque
/// strings; callers own any JSON encoding inside them.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// File-backed store: a single JSON object of string keys, rewritten
/// on every mutation. A missing or unparsable file reads as empty.
pub struct FileStore {
    path: PathBuf,
    cache: Mutex<Option<HashMap<String, String>>>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cache: Mutex::new(None),
        }
    }

    async fn load(&self) -> Result<HashMap<String, String>> {
        if let Some(map) = self.cache.lock().ok().and_then(|c| c.clone()) {
            return Ok(map);
        }

        let map = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(map) => map,
                Err(e) => {
                    warn!(
                        "Discarding unparsable session file {}: {}",
                        self.path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some(map.clone());
        }
        Ok(map)
    }

    async fn persist(&self, map: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(map).context("Failed to encode session file")?;
        tokio::fs::write(&self.path, content)
            .await
            .with_context(|| format!("Failed to write session file: {}", self.path.display()))?;

        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some(map.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load().await?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.load().await?;
        map.insert(key.to_string(), value.to_string());
        self.persist(&map).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut map = self.load().await?;
        if map.remove(key).is_some() {
            self.persist(&map).await?;
        }
        Ok(())
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .map
            .lock()
            .map_err(|_| anyhow::anyhow!("Store lock poisoned"))?
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.map
            .lock()
            .map_err(|_| anyhow::anyhow!("Store lock poisoned"))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.map
            .lock()
            .map_err(|_| anyhow::anyhow!("Store lock poisoned"))?
            .remove(key);
        Ok(())
    }
}
