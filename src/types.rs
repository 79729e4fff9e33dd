use serde::Deserialize;
use serde::Serialize;
use std::borrow::Borrow;
use std::fmt::Display;

use crate::value::Value;

/// Stable identity of a cached record. For documents it is canonically `"<type>:<id>"`; records cached with
/// [`DocumentCache::add_as_document()`](crate::DocumentCache::add_as_document) use whatever key the caller supplied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheId(String);

impl CacheId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_parts(type_name: &str, id: &str) -> Self {
        Self(format!("{type_name}:{id}"))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `<type>` part of a `"<type>:<id>"` identity.
    pub fn type_name(&self) -> Option<&str> {
        match self.0.split_once(':') {
            Some((prefix, _)) if !prefix.is_empty() => Some(prefix),
            _ => None,
        }
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for CacheId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CacheId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&CacheId> for CacheId {
    fn from(id: &CacheId) -> Self {
        id.clone()
    }
}

impl AsRef<str> for CacheId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    /// Flush order.
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Create, ChangeKind::Update, ChangeKind::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub id:   CacheId,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, id: CacheId) -> Self {
        Self { kind, id }
    }
}

/// One record of [`DocumentCache::export()`](crate::DocumentCache::export). The document is in its normalized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportItem {
    pub id:       CacheId,
    pub document: Value,
}

/// How the default identity rule turns the configured id fields into an id string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdStrategy {
    /// Use the value of the first id field present on the document.
    #[default]
    FirstPresent,
    /// Render every configured id field, missing ones as empty strings, and join them with `+`.
    ///
    /// A document with none of the id fields has no id at all rather than one made of separators, so a typed
    /// document resolves to `"<type>:"` under both strategies.
    JoinAll,
}

/// Anything an operation can be pointed at: an identity or a value to derive identities from.
#[derive(Debug, Clone, PartialEq)]
pub enum Subject {
    Id(CacheId),
    Value(Value),
}

impl From<&str> for Subject {
    fn from(s: &str) -> Self {
        Self::Id(CacheId::from(s))
    }
}

impl From<String> for Subject {
    fn from(s: String) -> Self {
        Self::Id(CacheId::from(s))
    }
}

impl From<CacheId> for Subject {
    fn from(id: CacheId) -> Self {
        Self::Id(id)
    }
}

impl From<&CacheId> for Subject {
    fn from(id: &CacheId) -> Self {
        Self::Id(id.clone())
    }
}

impl From<Value> for Subject {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&Value> for Subject {
    fn from(value: &Value) -> Self {
        Self::Value(value.clone())
    }
}

impl From<serde_json::Value> for Subject {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value.into())
    }
}
