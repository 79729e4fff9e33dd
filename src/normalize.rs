use std::future::Future;
use std::pin::Pin;
use tracing::trace;

use crate::error::DocCacheError;
use crate::error::Result;
use crate::extract::Extractor;
use crate::traits::Store;
use crate::types::CacheId;
use crate::value::Map;
use crate::value::Value;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Converts between nested values, where documents are inline, and normalized ones, where every nested document is
/// a [`Value::Reference`].
#[derive(Debug, Clone)]
pub struct Normalizer {
    extractor: Extractor,
}

impl Normalizer {
    pub fn new(extractor: Extractor) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Clones the value replacing every nested document with a reference. The value itself is never replaced, even
    /// if it is a document: its top-level fields are what gets stored under its identity.
    pub fn normalize(&self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::Map(map) => Value::Map(self.normalize_map(map)?),
            Value::List(list) => Value::List(
                list.iter()
                    .map(|child| self.normalize_child(child))
                    .collect::<Result<_>>()?,
            ),
            other => other.clone(),
        })
    }

    pub fn normalize_map(&self, map: &Map) -> Result<Map> {
        map.iter()
            .map(|(field, child)| Ok((field.clone(), self.normalize_child(child)?)))
            .collect()
    }

    fn normalize_child(&self, child: &Value) -> Result<Value> {
        if let Value::Map(map) = child {
            if let Some(id) = self.extractor.identity_of(map)? {
                return Ok(Value::Reference(id));
            }
        }
        self.normalize(child)
    }

    /// Clones the value resolving references against the store, transitively.
    ///
    /// A missing record becomes `null` in a map field and is dropped from a list. A reference to a record which is
    /// already being expanded higher up the same path is left as is, so cyclic records terminate.
    pub async fn denormalize<S: Store>(&self, store: &S, value: &Value) -> Result<Value> {
        let mut path = Vec::new();
        self.expand(store, value, &mut path).await
    }

    /// Fetches a record and denormalizes it. `None` if the store doesn't have it.
    pub async fn resolve<S: Store>(&self, store: &S, id: &CacheId) -> Result<Option<Value>> {
        let mut path = Vec::new();
        self.resolve_on_path(store, id, &mut path).await
    }

    fn resolve_on_path<'a, S: Store>(
        &'a self,
        store: &'a S,
        id: &'a CacheId,
        path: &'a mut Vec<CacheId>,
    ) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            let Some(raw) = store.get(id).await.map_err(DocCacheError::store)?
            else {
                return Ok(None);
            };
            path.push(id.clone());
            let expanded = self.expand(store, &raw, path).await;
            path.pop();
            expanded.map(Some)
        })
    }

    async fn follow<S: Store>(&self, store: &S, id: &CacheId, path: &mut Vec<CacheId>) -> Result<Option<Value>> {
        if path.contains(id) {
            trace!("back reference to '{id}' left unexpanded");
            return Ok(Some(Value::Reference(id.clone())));
        }
        self.resolve_on_path(store, id, path).await
    }

    fn expand<'a, S: Store>(
        &'a self,
        store: &'a S,
        value: &'a Value,
        path: &'a mut Vec<CacheId>,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            Ok(match value {
                Value::Reference(id) => self.follow(store, id, path).await?.unwrap_or(Value::Null),
                Value::Map(map) => {
                    let mut expanded = Map::with_capacity(map.len());
                    for (field, child) in map {
                        let child = self.expand(store, child, path).await?;
                        expanded.insert(field.clone(), child);
                    }
                    Value::Map(expanded)
                }
                Value::List(list) => {
                    let mut expanded = Vec::with_capacity(list.len());
                    for child in list {
                        if let Value::Reference(id) = child {
                            match self.follow(store, id, path).await? {
                                Some(resolved) => expanded.push(resolved),
                                None => trace!("dangling reference to '{id}' dropped from a list"),
                            }
                        }
                        else {
                            expanded.push(self.expand(store, child, path).await?);
                        }
                    }
                    Value::List(expanded)
                }
                other => other.clone(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FieldResolver;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn normalizer() -> Normalizer {
        Normalizer::new(Extractor::new(Arc::new(FieldResolver::default())))
    }

    #[test]
    fn nested_documents_become_references() {
        let n = normalizer();
        let value = Value::from(json!({
            "__typename": "User", "_id": "1",
            "handle": {"__typename": "Handle", "_id": "h1", "value": "@john"},
            "friends": [{"__typename": "User", "_id": "2"}, {"plain": true}],
            "meta": {"tags": ["a"]}
        }));

        let normalized = n.normalize(&value).unwrap();
        assert_eq!(normalized.get("handle"), Some(&Value::reference("Handle:h1")));
        assert_eq!(
            normalized.get("friends"),
            Some(&Value::List(vec![
                Value::reference("User:2"),
                Value::from(json!({"plain": true}))
            ]))
        );
        assert_eq!(normalized.get("meta"), value.get("meta"));
        assert_eq!(normalized.get("_id"), Some(&Value::from("1")));
    }

    #[tokio::test]
    async fn dangling_references() {
        let n = normalizer();
        let store = MemoryStore::new();
        store
            .set(&CacheId::from("User:2"), Value::from(json!({"_id": "2", "__typename": "User"})))
            .await
            .unwrap();

        let mut map = Map::new();
        map.insert(
            "friends".into(),
            Value::List(vec![Value::reference("User:2"), Value::reference("User:404")]),
        );
        map.insert("best".into(), Value::reference("User:404"));
        let value = Value::Map(map);

        let expanded = n.denormalize(&store, &value).await.unwrap();
        assert_eq!(
            expanded,
            Value::from(json!({"friends": [{"_id": "2", "__typename": "User"}], "best": null}))
        );
    }

    #[tokio::test]
    async fn cyclic_records_terminate() {
        let n = normalizer();
        let store = MemoryStore::new();
        let mut a = Map::new();
        a.insert("name".into(), Value::from("a"));
        a.insert("peer".into(), Value::reference("N:b"));
        let mut b = Map::new();
        b.insert("name".into(), Value::from("b"));
        b.insert("peer".into(), Value::reference("N:a"));
        store.set(&CacheId::from("N:a"), Value::Map(a)).await.unwrap();
        store.set(&CacheId::from("N:b"), Value::Map(b)).await.unwrap();

        let resolved = n.resolve(&store, &CacheId::from("N:a")).await.unwrap().unwrap();
        let peer = resolved.get("peer").unwrap();
        assert_eq!(peer.get("name"), Some(&Value::from("b")));
        assert_eq!(peer.get("peer"), Some(&Value::reference("N:a")));
    }
}
