use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::Result;
use crate::types::CacheId;
use crate::types::ExportItem;
use crate::value::Map;
use crate::value::Value;

/// Backing storage of a [`DocumentCache`](crate::DocumentCache).
///
/// A store is a plain map from identity to a normalized record. It knows nothing of documents, references, or
/// identity rules. All methods take `&self`; implementations are expected to use internal locking.
#[async_trait]
pub trait Store: Debug + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get(&self, id: &CacheId) -> Result<Option<Value>, Self::Error>;
    async fn set(&self, id: &CacheId, value: Value) -> Result<(), Self::Error>;
    async fn delete(&self, id: &CacheId) -> Result<(), Self::Error>;
    async fn has(&self, id: &CacheId) -> Result<bool, Self::Error>;
    async fn size(&self) -> Result<usize, Self::Error>;
    async fn clear(&self) -> Result<(), Self::Error>;
    async fn export(&self) -> Result<Vec<ExportItem>, Self::Error>;
}

/// Derives the type and the identity of a document candidate.
///
/// The default implementation is [`FieldResolver`](crate::identity::FieldResolver), configured from the cache
/// builder. A custom implementation replaces it entirely.
pub trait IdentityResolver: Debug + Send + Sync + 'static {
    /// Returns `Ok(None)` if the value is not a document. Producing anything but a string or nothing is a
    /// configuration error and must be reported as [`DocCacheError::InvalidType`](crate::DocCacheError::InvalidType).
    fn resolve_type(&self, doc: &Map) -> Result<Option<String>>;

    fn resolve_id(&self, doc: &Map, type_name: &str) -> Option<CacheId>;

    /// Whether a field carries the type or the identity of a document rather than content. Such fields are left out
    /// of type shapes. `type_name` is `None` for maps that are not documents.
    fn is_meta_field(&self, type_name: Option<&str>, field: &str) -> bool {
        let _ = (type_name, field);
        false
    }
}
