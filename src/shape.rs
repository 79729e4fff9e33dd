use indexmap::IndexMap;
use std::fmt::Display;

use crate::error::Result;
use crate::extract::Extractor;
use crate::value::Value;

/// Type shape of a value, as seen through the cache's identity rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// A non-structured value: `"null"`, `"boolean"`, `"number"` or `"string"`.
    Scalar(&'static str),
    /// A document or a reference to one, by type name.
    Document(String),
    /// A list of elements of the same shape.
    ListOf(Box<Shape>),
    /// A list of mixed shapes, element by element.
    Tuple(Vec<Shape>),
    /// A plain map, field by field. Identity and type fields are omitted.
    Record(IndexMap<String, Shape>),
}

impl Shape {
    pub fn is_document(&self) -> bool {
        matches!(self, Self::Document(_))
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(kind) => f.write_str(kind),
            Self::Document(type_name) => f.write_str(type_name),
            Self::ListOf(element) => write!(f, "{element}[]"),
            Self::Tuple(elements) => {
                f.write_str("[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{element}")?;
                }
                f.write_str("]")
            }
            Self::Record(fields) => {
                f.write_str("{")?;
                for (i, (field, shape)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}: {shape}")?;
                }
                f.write_str("}")
            }
        }
    }
}

pub(crate) struct ShapeInference<'a> {
    extractor: &'a Extractor,
}

impl<'a> ShapeInference<'a> {
    pub(crate) fn new(extractor: &'a Extractor) -> Self {
        Self { extractor }
    }

    pub(crate) fn infer(&self, value: &Value) -> Result<Shape> {
        Ok(match value {
            Value::Map(map) => {
                let type_name = self.extractor.type_of(map)?;
                let resolver = self.extractor.resolver();
                let mut fields = IndexMap::with_capacity(map.len());
                for (field, child) in map {
                    if resolver.is_meta_field(type_name.as_deref(), field) {
                        continue;
                    }
                    fields.insert(field.clone(), self.infer_child(child)?);
                }
                Shape::Record(fields)
            }
            Value::List(list) => {
                let elements = list.iter().map(|e| self.infer_child(e)).collect::<Result<Vec<_>>>()?;
                match elements.first() {
                    Some(first) if elements.iter().all(|e| e == first) => Shape::ListOf(Box::new(first.clone())),
                    _ => Shape::Tuple(elements),
                }
            }
            Value::Reference(id) => match id.type_name() {
                Some(type_name) => Shape::Document(type_name.to_string()),
                None => Shape::Scalar("string"),
            },
            scalar => Shape::Scalar(scalar.kind_name()),
        })
    }

    // A nested document is summarized by its type.
    fn infer_child(&self, child: &Value) -> Result<Shape> {
        if let Value::Map(map) = child {
            if let Some(type_name) = self.extractor.type_of(map)? {
                return Ok(Shape::Document(type_name));
            }
        }
        self.infer(child)
    }
}
