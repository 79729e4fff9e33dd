use async_trait::async_trait;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use std::convert::Infallible;
use std::fmt::Debug;

use crate::traits::Store;
use crate::types::CacheId;
use crate::types::ExportItem;
use crate::value::Value;

/// Bounded in-memory store over a [moka](https://crates.io/crates/moka) cache.
///
/// Evicted records behave exactly like removed ones: references to them dangle and are dropped or nulled by the
/// denormalizer. Exports are sorted by identity since moka doesn't keep any particular order.
pub struct MokaStore {
    cache: Cache<CacheId, Value>,
}

impl MokaStore {
    /// A store with TinyLFU eviction.
    pub fn new(max_capacity: u64) -> Self {
        Self::with_policy(max_capacity, EvictionPolicy::tiny_lfu(), None)
    }

    pub fn with_policy(max_capacity: u64, policy: EvictionPolicy, name: Option<&str>) -> Self {
        let mut builder = Cache::builder().max_capacity(max_capacity).eviction_policy(policy);
        if let Some(name) = name {
            builder = builder.name(name);
        }
        Self { cache: builder.build() }
    }

    pub fn name(&self) -> &str {
        self.cache.name().unwrap_or("<anon>")
    }

    pub fn max_capacity(&self) -> Option<u64> {
        self.cache.policy().max_capacity()
    }
}

impl Debug for MokaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaStore")
            .field("name", &self.name())
            .field("max_capacity", &self.max_capacity())
            .finish()
    }
}

#[async_trait]
impl Store for MokaStore {
    type Error = Infallible;

    async fn get(&self, id: &CacheId) -> Result<Option<Value>, Self::Error> {
        Ok(self.cache.get(id).await)
    }

    async fn set(&self, id: &CacheId, value: Value) -> Result<(), Self::Error> {
        self.cache.insert(id.clone(), value).await;
        Ok(())
    }

    async fn delete(&self, id: &CacheId) -> Result<(), Self::Error> {
        self.cache.invalidate(id).await;
        Ok(())
    }

    async fn has(&self, id: &CacheId) -> Result<bool, Self::Error> {
        Ok(self.cache.contains_key(id))
    }

    async fn size(&self) -> Result<usize, Self::Error> {
        // The entry count is only exact once the pending maintenance is done.
        self.cache.run_pending_tasks().await;
        Ok(self.cache.entry_count() as usize)
    }

    async fn clear(&self) -> Result<(), Self::Error> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn export(&self) -> Result<Vec<ExportItem>, Self::Error> {
        let mut items = self
            .cache
            .iter()
            .map(|(id, document)| ExportItem {
                id: (*id).clone(),
                document,
            })
            .collect::<Vec<_>>();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }
}
