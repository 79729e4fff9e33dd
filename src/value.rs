//! The structured value the cache operates on.
//!
//! Documents arrive as arbitrary nested data. Inside the store, a nested document is replaced with a
//! [`Value::Reference`] to its identity; references are a variant of their own and never collide with ordinary string
//! fields.
//!
//! On the wire (see [`Serialize`]/[`Deserialize`] implementations) a reference is written as the single-key object
//! `{"__ref": "<CacheId>"}`. Converting from a plain [`serde_json::Value`] with [`From`] never produces references.

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde_json::Number;
use std::fmt::Display;

use crate::types::CacheId;

pub type Map = IndexMap<String, Value>;

/// Key of the wire encoding of a reference.
pub const REF_KEY: &str = "__ref";

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<Value>),
    Map(Map),
    Reference(CacheId),
}

impl Value {
    pub fn reference(id: impl Into<CacheId>) -> Self {
        Self::Reference(id.into())
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[inline]
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::List(_) | Self::Map(_))
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut Map> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&CacheId> {
        match self {
            Self::Reference(id) => Some(id),
            _ => None,
        }
    }

    /// Field lookup for maps; `None` for anything else.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(field))
    }

    /// `null`, `false`, zero and the empty string are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
            Self::String(s) => !s.is_empty(),
            Self::List(_) | Self::Map(_) | Self::Reference(_) => true,
        }
    }

    /// Textual form of a value used as a document id.
    pub fn render_id(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => n.to_string(),
            Self::String(s) => s.clone(),
            Self::Reference(id) => id.to_string(),
            Self::List(_) | Self::Map(_) => self.to_json().to_string(),
        }
    }

    /// Name of the value kind as used by shape inference.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Reference(_) => "reference",
        }
    }

    /// Converts into plain JSON; references take their wire form.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(l) => serde_json::Value::Array(l.iter().map(Value::to_json).collect()),
            Self::Map(m) => serde_json::Value::Object(m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
            Self::Reference(id) => {
                let mut obj = serde_json::Map::new();
                obj.insert(REF_KEY.to_string(), serde_json::Value::String(id.to_string()));
                serde_json::Value::Object(obj)
            }
        }
    }

    /// Converts from JSON recognizing the wire form of references.
    pub fn from_wire(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Object(obj) => {
                if obj.len() == 1 {
                    if let Some(serde_json::Value::String(id)) = obj.get(REF_KEY) {
                        return Self::Reference(CacheId::new(id.as_str()));
                    }
                }
                Self::Map(obj.into_iter().map(|(k, v)| (k, Self::from_wire(v))).collect())
            }
            serde_json::Value::Array(arr) => Self::List(arr.into_iter().map(Self::from_wire).collect()),
            other => Self::from(other),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(arr) => Self::List(arr.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(obj) => Self::Map(obj.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Self::Map(m)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Self::List(l)
    }
}

impl From<CacheId> for Value {
    fn from(id: CacheId) -> Self {
        Self::Reference(id)
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;

        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(l) => serializer.collect_seq(l),
            Self::Map(m) => serializer.collect_map(m),
            Self::Reference(id) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(REF_KEY, id.as_str())?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        serde_json::Value::deserialize(deserializer).map(Self::from_wire)
    }
}
