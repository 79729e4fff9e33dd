use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::convert::Infallible;

use crate::traits::Store;
use crate::types::CacheId;
use crate::types::ExportItem;
use crate::value::Value;

/// Unbounded in-memory store. Exports in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<IndexMap<CacheId, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Error = Infallible;

    async fn get(&self, id: &CacheId) -> Result<Option<Value>, Self::Error> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn set(&self, id: &CacheId, value: Value) -> Result<(), Self::Error> {
        self.records.write().insert(id.clone(), value);
        Ok(())
    }

    async fn delete(&self, id: &CacheId) -> Result<(), Self::Error> {
        // Keep the order of the remaining records stable.
        self.records.write().shift_remove(id);
        Ok(())
    }

    async fn has(&self, id: &CacheId) -> Result<bool, Self::Error> {
        Ok(self.records.read().contains_key(id))
    }

    async fn size(&self) -> Result<usize, Self::Error> {
        Ok(self.records.read().len())
    }

    async fn clear(&self) -> Result<(), Self::Error> {
        self.records.write().clear();
        Ok(())
    }

    async fn export(&self) -> Result<Vec<ExportItem>, Self::Error> {
        Ok(self
            .records
            .read()
            .iter()
            .map(|(id, document)| ExportItem {
                id:       id.clone(),
                document: document.clone(),
            })
            .collect())
    }
}
