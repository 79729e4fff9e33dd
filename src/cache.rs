use fieldx_plus::fx_plus;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use tracing::instrument;
use tracing::trace;

use crate::error::DocCacheError;
use crate::error::Result;
use crate::extract::Extractor;
use crate::identity::default_id_fields;
use crate::identity::default_type_fields;
use crate::identity::FieldResolver;
use crate::identity::Policies;
use crate::normalize::Normalizer;
use crate::notifier::ChangeNotifier;
use crate::notifier::WriteBatch;
use crate::shape::Shape;
use crate::shape::ShapeInference;
use crate::store::MemoryStore;
use crate::subscription::Subscription;
use crate::traits::IdentityResolver;
use crate::traits::Store;
use crate::types::CacheId;
use crate::types::ChangeKind;
use crate::types::ExportItem;
use crate::types::IdStrategy;
use crate::types::Subject;
use crate::value::Map;
use crate::value::Value;

/// Normalized document cache over a [`Store`].
///
/// Documents found in added values are stored flat, under their identities, with nested documents replaced by
/// references. Reading a record back resolves the references against the store.
///
/// ```ignore
/// let cache = DocumentCache::builder()
///     .store(Arc::new(MemoryStore::new()))
///     .id_fields(vec!["_id".to_string()])
///     .build()?;
///
/// cache.extract_and_add(&Value::from(response)).await?;
/// let user = cache.resolve("User:1").await?;
///
/// let subscription = cache.subscription("User:1")?;
/// subscription.on(ChangeKind::Update, Arc::new(|event: &ChangeEvent| println!("{} changed", event.id)));
/// ```
#[fx_plus(
    parent,
    no_new,
    default(off),
    sync,
    builder(
        doc("Builder object of [`DocumentCache`].", "", "See [`DocumentCache::builder()`] method."),
        method_doc("Implement builder pattern for [`DocumentCache`]."),
    )
)]
pub struct DocumentCache<S>
where
    S: Store,
{
    #[fieldx(vis(pub(crate)), builder(vis(pub), required), get(clone))]
    store: Arc<S>,

    /// Cache name. Most useful for debugging and logging.
    #[fieldx(get, builder(into), default(String::from("documents")))]
    name: String,

    /// Candidate identity fields, in probing order.
    #[fieldx(get, default(default_id_fields()))]
    id_fields: Vec<String>,

    /// Candidate type fields, in probing order.
    #[fieldx(get, default(default_type_fields()))]
    type_fields: Vec<String>,

    #[fieldx(get(copy), default(IdStrategy::FirstPresent))]
    id_strategy: IdStrategy,

    #[fieldx(get, default(Policies::new()))]
    policies: Policies,

    /// Replaces the field-probing identity rules altogether. `id_fields`, `id_strategy` and `policies` are ignored
    /// when set.
    #[fieldx(optional, get(clone))]
    custom_resolver: Arc<dyn IdentityResolver>,

    /// Reserved for orphan eviction. Enables a call to [`remove_orphans()`](Self::remove_orphans) after every
    /// removal.
    #[fieldx(get(copy), default(false))]
    auto_remove_orphans: bool,

    /// Flush change notifications automatically on the tokio runtime. Otherwise they wait for
    /// [`flush_pending_updates()`](Self::flush_pending_updates).
    #[fieldx(get(copy), default(true))]
    auto_flush: bool,

    #[fieldx(lazy, get(clone), builder(off))]
    resolver: Arc<dyn IdentityResolver>,

    #[fieldx(vis(pub(crate)), lazy, get(clone), builder(off))]
    normalizer: Arc<Normalizer>,

    #[fieldx(lazy, get(clone), builder(off))]
    notifier: Arc<ChangeNotifier>,
}

impl<S> DocumentCache<S>
where
    S: Store,
{
    fn build_resolver(&self) -> Arc<dyn IdentityResolver> {
        self.custom_resolver().unwrap_or_else(|| {
            Arc::new(FieldResolver::new(
                self.id_fields().clone(),
                self.type_fields().clone(),
                self.id_strategy(),
                self.policies().clone(),
            )) as Arc<dyn IdentityResolver>
        })
    }

    fn build_normalizer(&self) -> Arc<Normalizer> {
        Arc::new(Normalizer::new(Extractor::new(self.resolver())))
    }

    fn build_notifier(&self) -> Arc<ChangeNotifier> {
        Arc::new(ChangeNotifier::new(self.auto_flush()))
    }

    pub fn extractor(&self) -> Extractor {
        self.normalizer().extractor().clone()
    }

    /// `true` if the value is a map with a resolvable type.
    pub fn is_document(&self, value: &Value) -> Result<bool> {
        self.normalizer().extractor().is_document(value)
    }

    pub fn type_of(&self, value: &Value) -> Result<Option<String>> {
        match value {
            Value::Map(map) => self.normalizer().extractor().type_of(map),
            Value::Reference(id) => Ok(id.type_name().map(String::from)),
            _ => Ok(None),
        }
    }

    /// Identity of a document, `None` for anything else.
    pub fn identity_of(&self, value: &Value) -> Result<Option<CacheId>> {
        match value {
            Value::Map(map) => self.normalizer().extractor().identity_of(map),
            _ => Ok(None),
        }
    }

    /// Identity a subject stands for. Identity strings and references are taken as they are, documents are run
    /// through the identity rules.
    pub fn resolve_id(&self, subject: impl Into<Subject>) -> Result<CacheId> {
        match subject.into() {
            Subject::Id(id) => Ok(id),
            Subject::Value(Value::Reference(id)) => Ok(id),
            Subject::Value(Value::String(id)) => Ok(CacheId::from(id)),
            Subject::Value(value) => self
                .identity_of(&value)?
                .ok_or_else(|| DocCacheError::not_a_document(&value)),
        }
    }

    /// Documents found in the value, parents before their nested documents.
    pub fn extract<'v>(&self, value: &'v Value) -> Result<Vec<&'v Map>> {
        self.normalizer().extractor().extract(value)
    }

    /// Sorted, deduplicated identities of the documents in the value.
    pub fn extract_refs(&self, value: &Value) -> Result<Vec<CacheId>> {
        self.normalizer().extractor().extract_refs(value)
    }

    pub fn normalize(&self, value: &Value) -> Result<Value> {
        self.normalizer().normalize(value)
    }

    /// Resolves all references in the value, recursively.
    #[instrument(level = "trace", skip(self, value))]
    pub async fn denormalize(&self, value: &Value) -> Result<Value> {
        let store = self.store();
        self.normalizer().denormalize(store.as_ref(), value).await
    }

    /// The denormalized record stored under the identity, or `None` if there is none.
    #[instrument(level = "trace", skip(self, id))]
    pub async fn resolve(&self, id: impl Into<CacheId>) -> Result<Option<Value>> {
        let id = id.into();
        let store = self.store();
        self.normalizer().resolve(store.as_ref(), &id).await
    }

    /// Type shape of a value: documents are summarized by their type names. Fields the active
    /// [`IdentityResolver`] reports as meta fields are omitted.
    pub fn shape(&self, value: &Value) -> Result<Shape> {
        let normalizer = self.normalizer();
        ShapeInference::new(normalizer.extractor()).infer(value)
    }

    async fn add_map(&self, document: &Map) -> Result<CacheId> {
        let normalizer = self.normalizer();
        let id = normalizer
            .extractor()
            .identity_of(document)?
            .ok_or_else(|| DocCacheError::not_a_document(&Value::Map(document.clone())))?;
        let normalized = normalizer.normalize_map(document)?;

        let store = self.store();
        let current = store.get(&id).await.map_err(DocCacheError::store)?;
        let kind = if current.is_some() {
            ChangeKind::Update
        }
        else {
            ChangeKind::Create
        };

        // Shallow merge: fields missing from the new version are kept.
        let merged = match current {
            Some(Value::Map(mut fields)) => {
                fields.extend(normalized);
                fields
            }
            _ => normalized,
        };

        trace!("[{}] {kind} '{id}'", self.name());
        store.set(&id, Value::Map(merged)).await.map_err(DocCacheError::store)?;
        self.notifier().notify(kind, id.clone());
        Ok(id)
    }

    async fn add_maps(&self, documents: Vec<&Map>) -> Result<Vec<CacheId>> {
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            ids.push(self.add_map(document).await?);
        }
        Ok(ids)
    }

    /// Stores a document merged over its previous version, if any. Nested documents are only referenced; use
    /// [`extract_and_add()`](Self::extract_and_add) to store them too.
    #[instrument(level = "trace", skip(self, document))]
    pub async fn add(&self, document: &Value) -> Result<CacheId> {
        let _batch = self.batch();
        match document {
            Value::Map(map) => self.add_map(map).await,
            other => Err(DocCacheError::not_a_document(other)),
        }
    }

    /// Adds documents one after another, in order.
    pub async fn add_all(&self, documents: &[Value]) -> Result<Vec<CacheId>> {
        let _batch = self.batch();
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            ids.push(self.add(document).await?);
        }
        Ok(ids)
    }

    /// Adds every document found in the value.
    #[instrument(level = "trace", skip(self, value))]
    pub async fn extract_and_add(&self, value: &Value) -> Result<Vec<CacheId>> {
        let _batch = self.batch();
        let documents = self.extract(value)?;
        self.add_maps(documents).await
    }

    /// Rewrites a document through an updater.
    ///
    /// The updater receives the current denormalized record, or null if there is none. What it returns replaces the
    /// record; if it returns `None`, the record as the updater left it is used instead. Every document found in the
    /// result is then added, so nested documents can be updated along.
    #[instrument(level = "trace", skip(self, subject, updater))]
    pub async fn update<F>(&self, subject: impl Into<Subject>, updater: F) -> Result<Vec<CacheId>>
    where
        F: FnOnce(&mut Value) -> Option<Value> + Send,
    {
        let _batch = self.batch();
        let id = self.resolve_id(subject)?;
        let mut current = self.resolve(id).await?.unwrap_or_default();
        let updated = updater(&mut current).unwrap_or(current);
        self.extract_and_add(&updated).await
    }

    /// Deletes a record. References to it elsewhere are left dangling.
    #[instrument(level = "trace", skip(self, subject))]
    pub async fn remove(&self, subject: impl Into<Subject>) -> Result<CacheId> {
        let _batch = self.batch();
        let id = self.resolve_id(subject)?;
        self.store().delete(&id).await.map_err(DocCacheError::store)?;
        debug!("[{}] removed '{id}'", self.name());
        self.notifier().notify(ChangeKind::Delete, id.clone());

        if self.auto_remove_orphans() {
            self.remove_orphans().await?;
        }
        Ok(id)
    }

    /// Eviction of records no longer referenced by anything. Not implemented: evicts nothing and returns 0.
    pub async fn remove_orphans(&self) -> Result<usize> {
        debug!("[{}] orphan eviction requested; nothing to do", self.name());
        Ok(0)
    }

    /// Caches an arbitrary value under an explicit key, such as a query result. Documents inside the value are added
    /// on their own; the value is stored normalized and always reported as updated.
    #[instrument(level = "trace", skip(self, value, key))]
    pub async fn add_as_document(&self, value: &Value, key: impl Into<CacheId>) -> Result<()> {
        let key = key.into();
        let _batch = self.batch();
        self.extract_and_add(value).await?;
        let normalized = self.normalize(value)?;
        self.store()
            .set(&key, normalized)
            .await
            .map_err(DocCacheError::store)?;
        self.notifier().notify(ChangeKind::Update, key);
        Ok(())
    }

    /// Awaits a result, caches it with [`add_as_document()`](Self::add_as_document) and hands it back.
    pub async fn from_result<Fut>(&self, key: impl Into<CacheId>, result: Fut) -> Result<Value>
    where
        Fut: Future<Output = Value> + Send,
    {
        let key = key.into();
        let value = result.await;
        self.add_as_document(&value, key).await?;
        Ok(value)
    }

    /// All records in their normalized form.
    pub async fn export(&self) -> Result<Vec<ExportItem>> {
        self.store().export().await.map_err(DocCacheError::store)
    }

    /// Writes records as they are, no merging and no notifications. A later item wins over an earlier one with the
    /// same identity.
    #[instrument(level = "trace", skip(self, items))]
    pub async fn import(&self, items: impl IntoIterator<Item = ExportItem>) -> Result<usize> {
        let store = self.store();
        let mut count = 0;
        for ExportItem { id, document } in items {
            store.set(&id, document).await.map_err(DocCacheError::store)?;
            count += 1;
        }
        debug!("[{}] imported {count} records", self.name());
        Ok(count)
    }

    pub async fn size(&self) -> Result<usize> {
        self.store().size().await.map_err(DocCacheError::store)
    }

    pub async fn contains(&self, id: impl Into<CacheId>) -> Result<bool> {
        let id = id.into();
        self.store().has(&id).await.map_err(DocCacheError::store)
    }

    /// Drops every record. Subscribers are not notified.
    pub async fn clear(&self) -> Result<()> {
        debug!("[{}] clearing", self.name());
        self.store().clear().await.map_err(DocCacheError::store)
    }

    /// Subscribes to changes of an identity, or of any document found in a value.
    ///
    /// A value with no documents in it can't be subscribed to and results in [`DocCacheError::EmptyTopics`].
    pub fn subscription(&self, subject: impl Into<Subject>) -> Result<Subscription> {
        let topics = match subject.into() {
            Subject::Id(id) => vec![id],
            Subject::Value(value) => self.extract_refs(&value)?,
        };
        if topics.is_empty() {
            return Err(DocCacheError::EmptyTopics);
        }
        Ok(Subscription::new(self.notifier(), topics))
    }

    /// Groups writes into one burst: their change notifications are flushed together once the batch and every other
    /// open batch are dropped. Each write method opens a batch of its own for its duration.
    pub fn batch(&self) -> WriteBatch {
        self.notifier().batch()
    }

    /// Delivers pending change notifications now. Returns the number of changes flushed.
    pub fn flush_pending_updates(&self) -> usize {
        self.notifier().flush()
    }

    /// Resolves when the next flush is done.
    pub fn flushed(&self) -> impl Future<Output = ()> + Send + 'static {
        self.notifier().flushed()
    }

    pub fn has_pending_updates(&self) -> bool {
        self.notifier().is_pending()
    }
}

impl DocumentCache<MemoryStore> {
    /// A cache over a fresh [`MemoryStore`] with default settings.
    pub fn in_memory() -> Result<Arc<Self>> {
        Self::builder()
            .store(Arc::new(MemoryStore::new()))
            .build()
            .map_err(|e| DocCacheError::Build(format!("in-memory document cache: {e}")))
    }
}
