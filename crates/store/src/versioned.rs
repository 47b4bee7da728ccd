//! In-memory versioned key-value state.
//!
//! Backed by a persistent hash map so that capturing an image for a
//! checkpoint is O(1): the image shares structure with the live map and
//! only diverges where later writes touch it.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use bastion_core::{traits::TransactionalStore, Result};

/// Captured state of a [`VersionedStore`].
#[derive(Debug, Clone)]
pub struct StateImage {
    version: u64,
    entries: im::HashMap<String, Value>,
}

impl StateImage {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
struct Inner {
    version: u64,
    entries: im::HashMap<String, Value>,
}

/// Versioned JSON document store.
///
/// Every write bumps the version. `rollback` reinstates an image as a whole,
/// so writes made after the image was captured are discarded.
#[derive(Debug, Default)]
pub struct VersionedStore {
    inner: RwLock<Inner>,
}

impl VersionedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().await.entries.get(key).cloned()
    }

    /// Insert or replace a value. Returns the new version.
    pub async fn put(&self, key: impl Into<String>, value: Value) -> u64 {
        let mut inner = self.inner.write().await;
        inner.entries.insert(key.into(), value);
        inner.version += 1;
        inner.version
    }

    pub async fn delete(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.write().await;
        let removed = inner.entries.remove(key);
        if removed.is_some() {
            inner.version += 1;
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn version(&self) -> u64 {
        self.inner.read().await.version
    }

    /// Point-in-time view of every entry.
    pub async fn entries(&self) -> im::HashMap<String, Value> {
        self.inner.read().await.entries.clone()
    }
}

#[async_trait]
impl TransactionalStore for VersionedStore {
    type Image = StateImage;

    async fn begin(&self) -> Result<StateImage> {
        let inner = self.inner.read().await;
        Ok(StateImage {
            version: inner.version,
            entries: inner.entries.clone(),
        })
    }

    async fn commit(&self, _image: StateImage) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self, image: StateImage) -> Result<()> {
        let mut inner = self.inner.write().await;
        tracing::debug!(
            from_version = inner.version,
            to_version = image.version,
            "Rolling back versioned store"
        );
        inner.entries = image.entries;
        // Versions stay monotonic across rollbacks.
        inner.version += 1;
        Ok(())
    }

    fn describe(&self, image: &StateImage) -> String {
        format!("versioned:v{}", image.version)
    }
}
