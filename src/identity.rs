use indexmap::IndexMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::DocCacheError;
use crate::error::Result;
use crate::traits::IdentityResolver;
use crate::types::CacheId;
use crate::types::IdStrategy;
use crate::value::Map;
use crate::value::Value;

/// Custom identity function of a [`TypePolicy`]. Receives the document, its resolved type, and the id fields in effect
/// for the type. Returning `None` falls back to the default rule.
pub type CacheIdFn = Arc<dyn Fn(&Map, &str, &[String]) -> Option<CacheId> + Send + Sync>;
pub type TypePredicate = Arc<dyn Fn(&Map) -> bool + Send + Sync>;

/// Per-type policies keyed by type name. Iteration order is registration order.
pub type Policies = IndexMap<String, TypePolicy>;

/// Per-type override of the identity rules.
#[derive(Clone, Default)]
pub struct TypePolicy {
    cache_id:  Option<CacheIdFn>,
    id_fields: Option<Vec<String>>,
    is_type:   Option<TypePredicate>,
}

impl TypePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_id<F>(mut self, f: F) -> Self
    where
        F: Fn(&Map, &str, &[String]) -> Option<CacheId> + Send + Sync + 'static,
    {
        self.cache_id = Some(Arc::new(f));
        self
    }

    pub fn with_id_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// A predicate claiming documents for this policy's type regardless of their type fields.
    pub fn with_type_predicate<F>(mut self, f: F) -> Self
    where
        F: Fn(&Map) -> bool + Send + Sync + 'static,
    {
        self.is_type = Some(Arc::new(f));
        self
    }

    pub fn id_fields(&self) -> Option<&[String]> {
        self.id_fields.as_deref()
    }

    fn claims(&self, doc: &Map) -> bool {
        self.is_type.as_ref().is_some_and(|p| p(doc))
    }
}

impl Debug for TypePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypePolicy")
            .field("cache_id", &self.cache_id.is_some())
            .field("id_fields", &self.id_fields)
            .field("is_type", &self.is_type.is_some())
            .finish()
    }
}

pub fn default_id_fields() -> Vec<String> {
    vec!["__id".to_string(), "_id".to_string(), "id".to_string()]
}

pub fn default_type_fields() -> Vec<String> {
    vec!["__typename".to_string(), "_type".to_string()]
}

/// `"<x>:<y>"` with both sides non-empty.
fn is_qualified(id: &str) -> bool {
    id.char_indices().any(|(i, c)| c == ':' && i > 0 && i + 1 < id.len())
}

/// The `<type>` of a `"<type>:..."` id.
fn type_prefix(id: &str) -> Option<&str> {
    id.find(':').filter(|i| *i > 0).map(|i| &id[..i])
}

/// The default [`IdentityResolver`]: probes configured fields and consults per-type policies.
#[derive(Debug, Clone)]
pub struct FieldResolver {
    id_fields:   Vec<String>,
    type_fields: Vec<String>,
    strategy:    IdStrategy,
    policies:    Policies,
}

impl Default for FieldResolver {
    fn default() -> Self {
        Self::new(
            default_id_fields(),
            default_type_fields(),
            IdStrategy::default(),
            Policies::new(),
        )
    }
}

impl FieldResolver {
    pub fn new(id_fields: Vec<String>, type_fields: Vec<String>, strategy: IdStrategy, policies: Policies) -> Self {
        Self {
            id_fields,
            type_fields,
            strategy,
            policies,
        }
    }

    pub fn id_fields(&self) -> &[String] {
        &self.id_fields
    }

    pub fn type_fields(&self) -> &[String] {
        &self.type_fields
    }

    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    /// Id fields in effect for a type: the policy's own, if it has any.
    fn id_fields_of(&self, type_name: &str) -> &[String] {
        self.policies
            .get(type_name)
            .and_then(TypePolicy::id_fields)
            .unwrap_or(self.id_fields.as_slice())
    }

    fn raw_id(&self, doc: &Map, fields: &[String]) -> Option<String> {
        match self.strategy {
            IdStrategy::FirstPresent => fields.iter().find_map(|f| doc.get(f)).map(Value::render_id),
            IdStrategy::JoinAll => {
                if fields.iter().any(|f| doc.contains_key(f)) {
                    Some(
                        fields
                            .iter()
                            .map(|f| doc.get(f).map(Value::render_id).unwrap_or_default())
                            .collect::<Vec<_>>()
                            .join("+"),
                    )
                }
                else {
                    None
                }
            }
        }
    }

    /// The default identity rule: an already qualified id is used verbatim, otherwise it is prefixed with the type.
    pub fn default_cache_id(&self, doc: &Map, type_name: &str, fields: &[String]) -> Option<CacheId> {
        let id = self.raw_id(doc, fields).unwrap_or_default();
        if type_name.is_empty() && id.is_empty() {
            return None;
        }
        if is_qualified(&id) {
            return Some(CacheId::new(id));
        }
        Some(CacheId::from_parts(type_name, &id))
    }
}

impl IdentityResolver for FieldResolver {
    fn resolve_type(&self, doc: &Map) -> Result<Option<String>> {
        if let Some((type_name, _)) = self.policies.iter().find(|(_, p)| p.claims(doc)) {
            return Ok(Some(type_name.clone()));
        }

        let type_value = self
            .type_fields
            .iter()
            .filter_map(|f| doc.get(f))
            .find(|v| v.is_truthy());
        if let Some(type_value) = type_value {
            return match type_value {
                Value::String(s) => Ok(Some(s.clone())),
                other => Err(DocCacheError::InvalidType(other.to_string())),
            };
        }

        Ok(self
            .raw_id(doc, &self.id_fields)
            .as_deref()
            .and_then(type_prefix)
            .map(str::to_string))
    }

    fn resolve_id(&self, doc: &Map, type_name: &str) -> Option<CacheId> {
        let policy = self.policies.get(type_name);
        let fields = self.id_fields_of(type_name);

        if let Some(cache_id) = policy.and_then(|p| p.cache_id.as_ref()) {
            if let Some(id) = cache_id(doc, type_name, fields) {
                return Some(id);
            }
        }

        self.default_cache_id(doc, type_name, fields)
    }

    fn is_meta_field(&self, type_name: Option<&str>, field: &str) -> bool {
        let id_fields = match type_name {
            Some(type_name) => self.id_fields_of(type_name),
            None => self.id_fields.as_slice(),
        };
        self.type_fields.iter().chain(id_fields).any(|f| f == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(json: serde_json::Value) -> Map {
        match Value::from(json) {
            Value::Map(m) => m,
            _ => panic!("not a map"),
        }
    }

    fn identify(resolver: &FieldResolver, json: serde_json::Value) -> Option<CacheId> {
        let doc = map(json);
        let type_name = resolver.resolve_type(&doc).unwrap()?;
        resolver.resolve_id(&doc, &type_name)
    }

    #[test]
    fn type_field_and_id() {
        let resolver = FieldResolver::default();
        assert_eq!(
            identify(&resolver, json!({"__typename": "User", "_id": "1"})),
            Some(CacheId::from("User:1"))
        );
        assert_eq!(
            identify(&resolver, json!({"_type": "Post", "id": 7})),
            Some(CacheId::from("Post:7"))
        );
    }

    #[test]
    fn first_present_id_field_wins() {
        let resolver = FieldResolver::default();
        assert_eq!(
            identify(&resolver, json!({"__typename": "User", "id": "b", "__id": "a"})),
            Some(CacheId::from("User:a"))
        );
    }

    #[test]
    fn qualified_id_is_used_verbatim() {
        let resolver = FieldResolver::default();
        assert_eq!(
            identify(&resolver, json!({"_id": "User:123", "name": "John"})),
            Some(CacheId::from("User:123"))
        );
        assert_eq!(
            identify(&resolver, json!({"__typename": "Account", "_id": "User:123"})),
            Some(CacheId::from("User:123"))
        );
    }

    #[test]
    fn untyped_values_are_not_documents() {
        let resolver = FieldResolver::default();
        assert_eq!(resolver.resolve_type(&map(json!({"_id": "123"}))).unwrap(), None);
        assert_eq!(resolver.resolve_type(&map(json!({"name": "x"}))).unwrap(), None);
        assert_eq!(resolver.resolve_type(&map(json!({"__typename": ""}))).unwrap(), None);
    }

    #[test]
    fn typed_value_without_id() {
        let resolver = FieldResolver::default();
        assert_eq!(
            identify(&resolver, json!({"__typename": "Viewer"})),
            Some(CacheId::from("Viewer:"))
        );
    }

    #[test]
    fn non_string_type_is_fatal() {
        let resolver = FieldResolver::default();
        let err = resolver
            .resolve_type(&map(json!({"__typename": 42, "_id": "1"})))
            .unwrap_err();
        assert!(matches!(err, DocCacheError::InvalidType(ref t) if t == "42"));
    }

    #[test]
    fn predicates_in_registration_order() {
        let mut policies = Policies::new();
        policies.insert(
            "Admin".to_string(),
            TypePolicy::new().with_type_predicate(|doc| doc.get("role") == Some(&Value::from("admin"))),
        );
        policies.insert(
            "Person".to_string(),
            TypePolicy::new().with_type_predicate(|doc| doc.contains_key("role")),
        );
        let resolver = FieldResolver::new(default_id_fields(), default_type_fields(), IdStrategy::FirstPresent, policies);

        assert_eq!(
            identify(&resolver, json!({"role": "admin", "_id": "1", "__typename": "User"})),
            Some(CacheId::from("Admin:1"))
        );
        assert_eq!(
            identify(&resolver, json!({"role": "guest", "_id": "2"})),
            Some(CacheId::from("Person:2"))
        );
    }

    #[test]
    fn custom_cache_id_and_fallback() {
        let mut policies = Policies::new();
        policies.insert(
            "User".to_string(),
            TypePolicy::new().with_cache_id(|doc, type_name, _| {
                doc.get("name")
                    .and_then(Value::as_str)
                    .map(|name| CacheId::from_parts(type_name, name))
            }),
        );
        let resolver = FieldResolver::new(default_id_fields(), default_type_fields(), IdStrategy::FirstPresent, policies);

        assert_eq!(
            identify(&resolver, json!({"_id": "User:123", "name": "John"})),
            Some(CacheId::from("User:John"))
        );
        assert_eq!(
            identify(&resolver, json!({"_id": "User:123"})),
            Some(CacheId::from("User:123"))
        );
    }

    #[test]
    fn policy_id_fields() {
        let mut policies = Policies::new();
        policies.insert("Book".to_string(), TypePolicy::new().with_id_fields(["isbn"]));
        let resolver = FieldResolver::new(default_id_fields(), default_type_fields(), IdStrategy::FirstPresent, policies);

        assert_eq!(
            identify(&resolver, json!({"__typename": "Book", "id": "1", "isbn": "978"})),
            Some(CacheId::from("Book:978"))
        );
    }

    #[test]
    fn join_all_strategy() {
        let resolver = FieldResolver::new(
            vec!["org".to_string(), "num".to_string()],
            default_type_fields(),
            IdStrategy::JoinAll,
            Policies::new(),
        );
        assert_eq!(
            identify(&resolver, json!({"__typename": "Seat", "org": "acme", "num": 12})),
            Some(CacheId::from("Seat:acme+12"))
        );
        assert_eq!(
            identify(&resolver, json!({"__typename": "Seat", "num": 3})),
            Some(CacheId::from("Seat:+3"))
        );
    }
}
