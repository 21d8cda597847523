//! Key/value store shared by every copy of an execution context
//!
//! Handlers persist small JSON documents here (e.g. tokens) across steps and
//! across programs that share the same store instance.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    async fn get(&self, key: &str) -> anyhow::Result<Option<JsonValue>>;

    /// Returns the previous value
    async fn set(&self, key: &str, value: JsonValue) -> anyhow::Result<Option<JsonValue>>;

    async fn remove(&self, key: &str) -> anyhow::Result<Option<JsonValue>>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, JsonValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, JsonValue>) -> R) -> anyhow::Result<R> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        Ok(f(&mut entries))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<JsonValue>> {
        self.with_entries(|entries| entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: JsonValue) -> anyhow::Result<Option<JsonValue>> {
        self.with_entries(|entries| entries.insert(key.to_string(), value))
    }

    async fn remove(&self, key: &str) -> anyhow::Result<Option<JsonValue>> {
        self.with_entries(|entries| entries.remove(key))
    }
}
