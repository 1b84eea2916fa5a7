use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{apply_find, push_at_path, DocumentStore, Filter, FindQuery};
use crate::error::Result;

/// In-memory store for development and tests.
///
/// Each collection is an immutable snapshot behind an `Arc`; writers
/// copy-on-write, so a reader holding a snapshot never sees a partial update.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Arc<Vec<Value>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn snapshot(&self, collection: &str) -> Arc<Vec<Value>> {
        self.collections.read().await.get(collection).cloned().unwrap_or_default()
    }

    /// Names of every collection currently present, sorted.
    pub async fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn clear(&self, collection: &str) -> Result<()> {
        self.collections.write().await.insert(collection.to_string(), Arc::new(Vec::new()));
        Ok(())
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_default();
        Arc::make_mut(entry).extend(documents);
        Ok(())
    }

    async fn push_each(&self, collection: &str, filter: &Filter, array_path: &str, values: Vec<Value>) -> Result<u64> {
        let mut collections = self.collections.write().await;
        let Some(entry) = collections.get_mut(collection) else {
            return Ok(0);
        };
        if !entry.iter().any(|doc| filter.matches(doc)) {
            return Ok(0);
        }

        let mut matched = 0;
        for document in Arc::make_mut(entry).iter_mut() {
            if filter.matches(document) {
                push_at_path(document, array_path, &values)?;
                matched += 1;
            }
        }
        Ok(matched)
    }

    async fn replace_collection(&self, source: &str, target: &str) -> Result<usize> {
        let mut collections = self.collections.write().await;
        let snapshot = collections.get(source).cloned().unwrap_or_default();
        let copied = snapshot.len();
        collections.insert(target.to_string(), snapshot);
        debug!(source, collection = target, copied, "replaced collection");
        Ok(copied)
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.collections.write().await.remove(collection);
        Ok(())
    }

    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Value>> {
        let snapshot = self.snapshot(collection).await;
        Ok(apply_find(snapshot.iter(), query))
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let snapshot = self.snapshot(collection).await;
        Ok(snapshot.iter().filter(|doc| filter.matches(doc)).count() as u64)
    }
}
