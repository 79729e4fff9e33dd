use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Result;
use crate::traits::IdentityResolver;
use crate::types::CacheId;
use crate::value::Map;
use crate::value::Value;

/// Finds documents embedded anywhere in a value.
///
/// Values are owned trees, hence cannot be cyclic; the traversal needs no visited set.
#[derive(Clone)]
pub struct Extractor {
    resolver: Arc<dyn IdentityResolver>,
}

impl Extractor {
    pub fn new(resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Arc<dyn IdentityResolver> {
        &self.resolver
    }

    pub fn type_of(&self, map: &Map) -> Result<Option<String>> {
        self.resolver.resolve_type(map)
    }

    /// A document is a map with a resolvable type.
    pub fn is_document(&self, value: &Value) -> Result<bool> {
        match value {
            Value::Map(map) => Ok(self.type_of(map)?.is_some()),
            _ => Ok(false),
        }
    }

    /// Identity of a map, `None` if it is not a document.
    pub fn identity_of(&self, map: &Map) -> Result<Option<CacheId>> {
        Ok(self
            .type_of(map)?
            .and_then(|type_name| self.resolver.resolve_id(map, &type_name)))
    }

    /// Every document found in the value, depth-first. A document precedes the documents nested in it, and the
    /// documents of one subtree are contiguous.
    pub fn extract<'v>(&self, value: &'v Value) -> Result<Vec<&'v Map>> {
        let mut found = Vec::new();
        self.collect(value, &mut found)?;
        Ok(found)
    }

    fn collect<'v>(&self, value: &'v Value, found: &mut Vec<&'v Map>) -> Result<()> {
        match value {
            Value::Map(map) => {
                if self.type_of(map)?.is_some() {
                    found.push(map);
                }
                for child in map.values() {
                    self.collect(child, found)?;
                }
            }
            Value::List(list) => {
                for child in list {
                    self.collect(child, found)?;
                }
            }
            _ => (),
        }
        Ok(())
    }

    /// Sorted, deduplicated identities of all documents in the value. A reference stands for its own identity only.
    pub fn extract_refs(&self, value: &Value) -> Result<Vec<CacheId>> {
        if let Value::Reference(id) = value {
            return Ok(vec![id.clone()]);
        }

        let mut ids = BTreeSet::new();
        for doc in self.extract(value)? {
            if let Some(id) = self.identity_of(doc)? {
                ids.insert(id);
            }
        }
        Ok(ids.into_iter().collect())
    }
}

impl Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor").field("resolver", &self.resolver).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FieldResolver;
    use serde_json::json;

    fn extractor() -> Extractor {
        Extractor::new(Arc::new(FieldResolver::default()))
    }

    #[test]
    fn primitives_and_empty_containers_yield_nothing() {
        let ex = extractor();
        for json in [json!(1), json!("hello"), json!(true), json!(null), json!({}), json!([])] {
            assert!(ex.extract(&Value::from(json)).unwrap().is_empty());
        }
    }

    #[test]
    fn parent_precedes_nested_documents() {
        let ex = extractor();
        let value = Value::from(json!({
            "data": [{
                "__typename": "User", "_id": "1",
                "friends": [
                    {"__typename": "User", "_id": "2", "handle": {"__typename": "Handle", "_id": "h2"}},
                    {"__typename": "User", "_id": "3"}
                ],
                "handle": {"__typename": "Handle", "_id": "h1"}
            }]
        }));

        let ids = ex
            .extract(&value)
            .unwrap()
            .into_iter()
            .map(|doc| ex.identity_of(doc).unwrap().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["User:1", "User:2", "Handle:h2", "User:3", "Handle:h1"]);
    }

    #[test]
    fn refs_are_sorted_and_unique() {
        let ex = extractor();
        let value = Value::from(json!([
            {"__typename": "B", "_id": "1"},
            {"__typename": "A", "_id": "1", "again": {"__typename": "B", "_id": "1"}},
            {"__typename": "C", "_id": "1"}
        ]));
        let refs = ex.extract_refs(&value).unwrap();
        assert_eq!(
            refs,
            vec![CacheId::from("A:1"), CacheId::from("B:1"), CacheId::from("C:1")]
        );
    }

    #[test]
    fn a_reference_is_its_own_topic() {
        let ex = extractor();
        let refs = ex.extract_refs(&Value::reference("User:9")).unwrap();
        assert_eq!(refs, vec![CacheId::from("User:9")]);
        assert!(ex.extract_refs(&Value::from("User:9")).unwrap().is_empty());
    }
}
