use crate::elem_id::ElemID;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A reference to another element or to a value nested inside one.
///
/// The resolved value is a cache hint only: it is never serialized and it
/// is ignored by equality, so a reference compares equal to itself whether
/// or not it has been resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceExpression {
    pub elem_id: ElemID,
    #[serde(skip)]
    pub resolved: Option<Box<Value>>,
}

impl ReferenceExpression {
    pub fn new(elem_id: ElemID) -> Self {
        Self {
            elem_id,
            resolved: None,
        }
    }

    pub fn with_resolved(elem_id: ElemID, value: Value) -> Self {
        Self {
            elem_id,
            resolved: Some(Box::new(value)),
        }
    }
}

impl PartialEq for ReferenceExpression {
    fn eq(&self, other: &Self) -> bool {
        self.elem_id == other.elem_id
    }
}

/// A file stored outside the NaCl tree, identified by content hash.
/// Two static files with the same hash are the same logical value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticFile {
    pub filepath: String,
    pub hash: String,
}

impl StaticFile {
    /// Hash the given content with crc32 (same scheme as the parse cache)
    pub fn new(filepath: impl Into<String>, content: &[u8]) -> Self {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(content);
        Self {
            filepath: filepath.into(),
            hash: format!("{:x}", hasher.finalize()),
        }
    }

    pub fn from_hash(filepath: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            filepath: filepath.into(),
            hash: hash.into(),
        }
    }
}

impl PartialEq for StaticFile {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

/// A NaCl value tree.
///
/// `Dynamic` stands in for expressions with no concrete value: the `*`
/// wildcard in error-recovery mode, or lowerings that already produced a
/// parse error. It matches nothing and validates as unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Number(f64),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Reference(ReferenceExpression),
    StaticFile(StaticFile),
    Dynamic,
}

impl Value {
    pub fn map(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Value::Map(entries.into_iter().collect())
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Value::String(_) | Value::Number(_) | Value::Bool(_))
    }

    pub fn is_empty_container(&self) -> bool {
        match self {
            Value::List(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
            _ => false,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Walk a nested path through maps and list indices
    pub fn get_nested(&self, path: &[String]) -> Option<&Value> {
        let mut current = self;
        for part in path {
            current = match current {
                Value::Map(entries) => entries.get(part)?,
                Value::List(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Short human label for error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Reference(_) => "reference",
            Value::StaticFile(_) => "static file",
            Value::Dynamic => "dynamic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_equality_ignores_cache() {
        let id = ElemID::new("salesforce", "Account");
        let bare = Value::Reference(ReferenceExpression::new(id.clone()));
        let cached = Value::Reference(ReferenceExpression::with_resolved(
            id,
            Value::String("hi".to_string()),
        ));
        assert_eq!(bare, cached);
    }

    #[test]
    fn test_static_file_equality_is_hash_equality() {
        let a = StaticFile::new("a/logo.png", b"content");
        let b = StaticFile::new("b/logo.png", b"content");
        let c = StaticFile::new("a/logo.png", b"different");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_get_nested() {
        let value = Value::map([
            (
                "address".to_string(),
                Value::map([("city".to_string(), Value::String("SF".to_string()))]),
            ),
            (
                "tags".to_string(),
                Value::List(vec![Value::String("a".to_string()), Value::String("b".to_string())]),
            ),
        ]);

        let city = value.get_nested(&["address".to_string(), "city".to_string()]);
        assert_eq!(city, Some(&Value::String("SF".to_string())));

        let second = value.get_nested(&["tags".to_string(), "1".to_string()]);
        assert_eq!(second, Some(&Value::String("b".to_string())));

        assert!(value.get_nested(&["missing".to_string()]).is_none());
    }

    #[test]
    fn test_reference_cache_not_serialized() {
        let id = ElemID::new("salesforce", "Account");
        let cached = ReferenceExpression::with_resolved(id, Value::Bool(true));
        let json = serde_json::to_string(&cached).unwrap();
        let back: ReferenceExpression = serde_json::from_str(&json).unwrap();
        assert!(back.resolved.is_none());
        assert_eq!(back, cached);
    }
}
