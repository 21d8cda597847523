//! Composable, conflict-checked registries
//!
//! A registry accumulates bundles (named sources of items) and merges them on
//! `reload()`. Two bundles defining the same key fail the whole reload; the
//! later bundle never silently wins. Commands and pipes are both served by
//! [`Registry`], parameterized by their capability trait.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod command;
pub mod pipe;


pub use command::{Arguments, CommandHandler, CommandRegistry};
pub use pipe::{PipeFunction, PipeRegistry};

/* ===================== Items and Bundles ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Command,
    Pipe,
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemType::Command => f.write_str("command"),
            ItemType::Pipe => f.write_str("pipe"),
        }
    }
}

/// Capability set shared by everything a registry can hold
#[async_trait]
pub trait RegistryItem: Send + Sync {
    /// Registry key (e.g. `@utils/set` or `upper`)
    fn id(&self) -> &str;

    fn item_type(&self) -> ItemType;

    /// Called after a successful reload, before the registry serves the item
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called before the next reload drops the item
    async fn dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Named provider of registry items
#[async_trait]
pub trait RegistryBundle<T: ?Sized + Send + Sync>: Send + Sync {
    fn id(&self) -> &str;

    async fn load(&self) -> anyhow::Result<IndexMap<String, Arc<T>>>;
}

/// In-process bundle: a fixed list of items keyed by their ids
pub struct StaticBundle<T: ?Sized> {
    id: String,
    items: Vec<Arc<T>>,
}

impl<T: ?Sized + RegistryItem> StaticBundle<T> {
    pub fn new(id: impl Into<String>, items: Vec<Arc<T>>) -> Self {
        Self {
            id: id.into(),
            items,
        }
    }
}

#[async_trait]
impl<T: ?Sized + RegistryItem + 'static> RegistryBundle<T> for StaticBundle<T> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn load(&self) -> anyhow::Result<IndexMap<String, Arc<T>>> {
        let mut items = IndexMap::with_capacity(self.items.len());
        for item in &self.items {
            let key = item.id().to_string();
            if items.insert(key.clone(), Arc::clone(item)).is_some() {
                anyhow::bail!("bundle '{}' defines '{}' twice", self.id, key);
            }
        }
        Ok(items)
    }
}

/* ===================== Errors ===================== */

/// One key defined by more than one bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConflict {
    pub key: String,
    /// Every bundle defining `key`, in add order
    pub bundles: Vec<String>,
}

/// Every colliding key found during a reload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("registry conflict: {}", describe_conflicts(.conflicts))]
pub struct RegistryConflictError {
    pub conflicts: Vec<KeyConflict>,
}

fn describe_conflicts(conflicts: &[KeyConflict]) -> String {
    conflicts
        .iter()
        .map(|c| format!("'{}' defined by [{}]", c.key, c.bundles.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Conflict(#[from] RegistryConflictError),

    #[error("failed to load bundle '{bundle}': {source:#}")]
    Load {
        bundle: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to initialize '{item}': {source:#}")]
    Init {
        item: String,
        #[source]
        source: anyhow::Error,
    },
}

/* ===================== Registry ===================== */

/// Ordered key -> item resolution built from bundles.
///
/// Resolution is exact-match only. Construct one per interpreter; there is no
/// process-wide default.
pub struct Registry<T: ?Sized + Send + Sync> {
    bundles: Vec<Arc<dyn RegistryBundle<T>>>,
    items: IndexMap<String, Arc<T>>,
    origins: IndexMap<String, String>,
}

impl<T: ?Sized + RegistryItem + 'static> Registry<T> {
    pub fn new() -> Self {
        Self {
            bundles: Vec::new(),
            items: IndexMap::new(),
            origins: IndexMap::new(),
        }
    }

    /// Queue a bundle for the next reload. A bundle with the same id replaces
    /// the earlier one in place.
    pub fn add_bundle<B>(&mut self, bundle: B) -> &mut Self
    where
        B: RegistryBundle<T> + 'static,
    {
        self.add_shared_bundle(Arc::new(bundle))
    }

    pub fn add_shared_bundle(&mut self, bundle: Arc<dyn RegistryBundle<T>>) -> &mut Self {
        match self.bundles.iter().position(|b| b.id() == bundle.id()) {
            Some(idx) => self.bundles[idx] = bundle,
            None => self.bundles.push(bundle),
        }
        self
    }

    /// Dispose current items, load every bundle, reject collisions, then
    /// initialize the new items.
    ///
    /// On error the registry is left empty.
    pub async fn reload(&mut self) -> Result<(), RegistryError> {
        for (key, item) in self.items.drain(..) {
            if let Err(e) = item.dispose().await {
                warn!(item = %key, error = %e, "Registry item dispose failed");
            }
        }
        self.origins.clear();

        let mut loaded = Vec::with_capacity(self.bundles.len());
        for bundle in &self.bundles {
            let items = bundle.load().await.map_err(|source| RegistryError::Load {
                bundle: bundle.id().to_string(),
                source,
            })?;
            debug!(bundle = bundle.id(), items = items.len(), "Loaded registry bundle");
            loaded.push((bundle.id().to_string(), items));
        }

        let mut owners: IndexMap<&str, Vec<String>> = IndexMap::new();
        for (bundle_id, items) in &loaded {
            for key in items.keys() {
                owners.entry(key.as_str()).or_default().push(bundle_id.clone());
            }
        }
        let conflicts: Vec<KeyConflict> = owners
            .into_iter()
            .filter(|(_, bundles)| bundles.len() > 1)
            .map(|(key, bundles)| KeyConflict {
                key: key.to_string(),
                bundles,
            })
            .collect();
        if !conflicts.is_empty() {
            return Err(RegistryConflictError { conflicts }.into());
        }

        let mut merged = IndexMap::new();
        let mut origins = IndexMap::new();
        for (bundle_id, items) in loaded {
            for (key, item) in items {
                origins.insert(key.clone(), bundle_id.clone());
                merged.insert(key, item);
            }
        }

        let mut initialized: Vec<&Arc<T>> = Vec::with_capacity(merged.len());
        for (key, item) in &merged {
            if let Err(source) = item.init().await {
                for done in initialized {
                    if let Err(e) = done.dispose().await {
                        warn!(item = done.id(), error = %e, "Registry item dispose failed");
                    }
                }
                return Err(RegistryError::Init {
                    item: key.clone(),
                    source,
                });
            }
            initialized.push(item);
        }

        info!(
            bundles = self.bundles.len(),
            items = merged.len(),
            "Registry reloaded"
        );
        self.items = merged;
        self.origins = origins;
        Ok(())
    }

    /// Exact-match lookup
    pub fn resolve(&self, key: &str) -> Option<Arc<T>> {
        self.items.get(key).cloned()
    }

    /// Bundle id that provided `key`
    pub fn origin(&self, key: &str) -> Option<&str> {
        self.origins.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn bundle_ids(&self) -> impl Iterator<Item = &str> {
        self.bundles.iter().map(|b| b.id())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: ?Sized + RegistryItem + 'static> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + Send + Sync> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("bundles", &self.bundles.iter().map(|b| b.id()).collect::<Vec<_>>())
            .field("items", &self.items.keys().collect::<Vec<_>>())
            .finish()
    }
}
