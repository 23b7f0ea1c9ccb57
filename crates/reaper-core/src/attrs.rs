//! Attribute values: the scalar/list/nested-map payload carried by
//! principals, resources, and request context (spec §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single attribute value. Mirrors the shape condition expressions can
/// compare against (§4.5): strings, numbers, bools, lists, and nested maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<AttrValue>),
    Map(HashMap<String, AttrValue>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttrValue]> {
        match self {
            AttrValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Dotted-path field access into nested maps, e.g. `a.b.c`.
    pub fn get_path(&self, path: &str) -> Option<&AttrValue> {
        let mut cur = self;
        for segment in path.split('.') {
            match cur {
                AttrValue::Map(m) => cur = m.get(segment)?,
                _ => return None,
            }
        }
        Some(cur)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<f64> for AttrValue {
    fn from(n: f64) -> Self {
        AttrValue::Number(n)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

/// An attribute map: the common shape for `Principal::attributes`,
/// `Resource::attributes`, and `CheckRequest::context`.
pub type AttrMap = HashMap<String, AttrValue>;
