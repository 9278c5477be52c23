//! StoreRegistry — at most one open store (and one lock) per path

use crate::config::StoreConfig;
use crate::store::StateStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use statekeep_core::{Document, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub struct StoreRegistry {
    stores: DashMap<PathBuf, Arc<StateStore>>,
    config: StoreConfig,
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl StoreRegistry {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            stores: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Open the store for `path`, or return the one already open.
    ///
    /// The first caller's default schema wins for the lifetime of the store.
    pub fn open(&self, path: impl AsRef<Path>, defaults: Document) -> Result<Arc<StateStore>> {
        let key = registry_key(path.as_ref());
        match self.stores.entry(key) {
            Entry::Occupied(entry) => {
                let store = entry.get().clone();
                if store.defaults() != &defaults {
                    warn!(
                        "Store {} already open with a different default schema, keeping the original",
                        store.path().display()
                    );
                }
                Ok(store)
            }
            Entry::Vacant(entry) => {
                // Opened while holding the shard guard: a second open racing
                // outside it could write defaults over the winner's first update.
                // Other paths in the same shard wait for this open to finish.
                let store = Arc::new(StateStore::open(entry.key().clone(), defaults, &self.config)?);
                entry.insert(store.clone());
                Ok(store)
            }
        }
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<Arc<StateStore>> {
        self.stores
            .get(&registry_key(path.as_ref()))
            .map(|s| s.value().clone())
    }

    /// Forget the store for `path`. Outstanding handles keep working.
    pub fn close(&self, path: impl AsRef<Path>) -> Option<Arc<StateStore>> {
        let removed = self.stores.remove(&registry_key(path.as_ref())).map(|(_, s)| s);
        if let Some(store) = &removed {
            info!("Closed store {}", store.path().display());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.stores.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }
}

fn registry_key(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
