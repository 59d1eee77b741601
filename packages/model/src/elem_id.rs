use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Namespace reserved for workspace variables
pub const VAR_NAMESPACE: &str = "var";

/// What kind of entity an ElemID points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElemIdType {
    Type,
    Field,
    Attr,
    Annotation,
    Instance,
    Var,
}

impl ElemIdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElemIdType::Type => "type",
            ElemIdType::Field => "field",
            ElemIdType::Attr => "attr",
            ElemIdType::Annotation => "annotation",
            ElemIdType::Instance => "instance",
            ElemIdType::Var => "var",
        }
    }

    pub fn from_part(part: &str) -> Option<Self> {
        match part {
            "type" => Some(ElemIdType::Type),
            "field" => Some(ElemIdType::Field),
            "attr" => Some(ElemIdType::Attr),
            "annotation" => Some(ElemIdType::Annotation),
            "instance" => Some(ElemIdType::Instance),
            "var" => Some(ElemIdType::Var),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ElemIdError {
    #[error("Invalid full name: {0}")]
    InvalidFullName(String),

    #[error("Cannot create nested ID for {0}: {1}")]
    InvalidNesting(String, String),
}

/// Structured element identifier.
///
/// Canonical string forms:
/// - type: `adapter.typeName`
/// - variable: `var.name`
/// - everything else: `adapter.typeName.<idType>.part[.part…]`
///
/// Equality, ordering and hashing all go through the same tuple that the
/// full name is rendered from, so two IDs compare equal exactly when their
/// full names match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElemID {
    adapter: String,
    type_name: String,
    id_type: ElemIdType,
    name_parts: Vec<String>,
}

impl ElemID {
    /// Top-level type ID
    pub fn new(adapter: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            type_name: type_name.into(),
            id_type: ElemIdType::Type,
            name_parts: Vec::new(),
        }
    }

    pub fn from_parts(
        adapter: impl Into<String>,
        type_name: impl Into<String>,
        id_type: ElemIdType,
        name_parts: Vec<String>,
    ) -> Self {
        Self {
            adapter: adapter.into(),
            type_name: type_name.into(),
            id_type,
            name_parts,
        }
    }

    /// Workspace variable ID (`var.<name>`)
    pub fn variable(name: impl Into<String>) -> Self {
        Self {
            adapter: VAR_NAMESPACE.to_string(),
            type_name: name.into(),
            id_type: ElemIdType::Var,
            name_parts: Vec::new(),
        }
    }

    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn id_type(&self) -> ElemIdType {
        self.id_type
    }

    pub fn name_parts(&self) -> &[String] {
        &self.name_parts
    }

    /// The trailing name part, or the type name for top-level IDs
    pub fn name(&self) -> &str {
        self.name_parts
            .last()
            .map(|s| s.as_str())
            .unwrap_or(&self.type_name)
    }

    pub fn is_top_level(&self) -> bool {
        match self.id_type {
            ElemIdType::Type | ElemIdType::Var => true,
            ElemIdType::Instance => self.name_parts.len() == 1,
            _ => false,
        }
    }

    /// Canonical stable string form
    pub fn get_full_name(&self) -> String {
        self.parts().join(".")
    }

    fn parts(&self) -> Vec<&str> {
        let mut parts: Vec<&str> = Vec::with_capacity(3 + self.name_parts.len());
        parts.push(&self.adapter);
        parts.push(&self.type_name);
        if self.id_type != ElemIdType::Type && self.id_type != ElemIdType::Var {
            parts.push(self.id_type.as_str());
        }
        parts.extend(self.name_parts.iter().map(|s| s.as_str()));
        parts
    }

    /// Parse a canonical full name back into an ID.
    ///
    /// `from_full_name(id.get_full_name()) == id` for every well-formed ID.
    pub fn from_full_name(full_name: &str) -> Result<Self, ElemIdError> {
        let parts: Vec<&str> = full_name.split('.').collect();
        match parts.as_slice() {
            [_single] => Err(ElemIdError::InvalidFullName(full_name.to_string())),
            [adapter, name] if *adapter == VAR_NAMESPACE => Ok(Self::variable(*name)),
            [adapter, type_name] => Ok(Self::new(*adapter, *type_name)),
            [adapter, type_name, id_type, rest @ ..] => {
                let id_type = ElemIdType::from_part(id_type)
                    .filter(|t| *t != ElemIdType::Type && *t != ElemIdType::Var)
                    .ok_or_else(|| ElemIdError::InvalidFullName(full_name.to_string()))?;
                if rest.is_empty() {
                    return Err(ElemIdError::InvalidFullName(full_name.to_string()));
                }
                Ok(Self::from_parts(
                    *adapter,
                    *type_name,
                    id_type,
                    rest.iter().map(|s| s.to_string()).collect(),
                ))
            }
            _ => Err(ElemIdError::InvalidFullName(full_name.to_string())),
        }
    }

    /// Create an ID nested under this one.
    ///
    /// From a type-level ID the first part selects the sub-namespace
    /// (`field`, `attr`, `annotation`, `instance`); from any other ID the
    /// parts extend the name path. Nesting is associative:
    /// `id.create_nested_id(&[a, b]) == id.create_nested_id(&[a]).create_nested_id(&[b])`.
    pub fn create_nested_id(&self, parts: &[&str]) -> Result<Self, ElemIdError> {
        if parts.is_empty() {
            return Ok(self.clone());
        }
        match self.id_type {
            ElemIdType::Type => {
                let id_type = ElemIdType::from_part(parts[0])
                    .filter(|t| *t != ElemIdType::Type && *t != ElemIdType::Var)
                    .ok_or_else(|| {
                        ElemIdError::InvalidNesting(
                            self.get_full_name(),
                            format!("expected an ID type part, got '{}'", parts[0]),
                        )
                    })?;
                Ok(Self::from_parts(
                    self.adapter.clone(),
                    self.type_name.clone(),
                    id_type,
                    parts[1..].iter().map(|s| s.to_string()).collect(),
                ))
            }
            ElemIdType::Var => Err(ElemIdError::InvalidNesting(
                self.get_full_name(),
                "variables have no nested IDs".to_string(),
            )),
            _ => {
                let mut name_parts = self.name_parts.clone();
                name_parts.extend(parts.iter().map(|s| s.to_string()));
                Ok(Self::from_parts(
                    self.adapter.clone(),
                    self.type_name.clone(),
                    self.id_type,
                    name_parts,
                ))
            }
        }
    }

    /// The immediate parent ID. Top-level IDs are their own parent.
    pub fn create_parent_id(&self) -> Self {
        if self.is_top_level() {
            return self.clone();
        }
        if self.name_parts.len() <= 1 {
            return Self::new(self.adapter.clone(), self.type_name.clone());
        }
        let mut name_parts = self.name_parts.clone();
        name_parts.pop();
        Self::from_parts(
            self.adapter.clone(),
            self.type_name.clone(),
            self.id_type,
            name_parts,
        )
    }

    /// The top-level element this ID lives under, plus the path below it.
    ///
    /// Idempotent at the top level: a top-level ID returns itself and an
    /// empty path.
    pub fn create_top_level_parent_id(&self) -> (Self, Vec<String>) {
        match self.id_type {
            ElemIdType::Type | ElemIdType::Var => (self.clone(), Vec::new()),
            ElemIdType::Instance => {
                if self.name_parts.len() <= 1 {
                    (self.clone(), Vec::new())
                } else {
                    (
                        Self::from_parts(
                            self.adapter.clone(),
                            self.type_name.clone(),
                            ElemIdType::Instance,
                            vec![self.name_parts[0].clone()],
                        ),
                        self.name_parts[1..].to_vec(),
                    )
                }
            }
            _ => (
                Self::new(self.adapter.clone(), self.type_name.clone()),
                self.name_parts.clone(),
            ),
        }
    }

    /// Whether `other` is nested (directly or transitively) under this ID
    pub fn is_parent_of(&self, other: &Self) -> bool {
        if self == other {
            return false;
        }
        let mine = self.parts();
        let theirs = other.parts();
        theirs.len() > mine.len() && theirs[..mine.len()] == mine[..]
    }

    pub fn is_equal(&self, other: &Self) -> bool {
        self == other
    }
}

impl fmt::Display for ElemID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_full_name())
    }
}

// Serialized as the canonical full name so IDs are stable map keys
impl Serialize for ElemID {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.get_full_name())
    }
}

impl<'de> Deserialize<'de> for ElemID {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let full_name = String::deserialize(deserializer)?;
        ElemID::from_full_name(&full_name).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_full_name() {
        let id = ElemID::new("salesforce", "Account");
        assert_eq!(id.get_full_name(), "salesforce.Account");
        assert!(id.is_top_level());
    }

    #[test]
    fn test_full_name_round_trip() {
        let ids = vec![
            ElemID::new("salesforce", "Account"),
            ElemID::variable("region"),
            ElemID::from_parts(
                "salesforce",
                "Account",
                ElemIdType::Field,
                vec!["Name".to_string()],
            ),
            ElemID::from_parts(
                "salesforce",
                "Account",
                ElemIdType::Instance,
                vec!["prod".to_string(), "address".to_string(), "city".to_string()],
            ),
        ];
        for id in ids {
            assert_eq!(ElemID::from_full_name(&id.get_full_name()).unwrap(), id);
        }
    }

    #[test]
    fn test_from_full_name_rejects_garbage() {
        assert!(ElemID::from_full_name("justone").is_err());
        assert!(ElemID::from_full_name("a.b.notatype.c").is_err());
        assert!(ElemID::from_full_name("a.b.field").is_err());
    }

    #[test]
    fn test_nested_id_from_type() {
        let typ = ElemID::new("salesforce", "Account");
        let field = typ.create_nested_id(&["field", "Name"]).unwrap();
        assert_eq!(field.get_full_name(), "salesforce.Account.field.Name");

        // nesting is associative
        let step1 = typ.create_nested_id(&["field"]).unwrap();
        let step2 = step1.create_nested_id(&["Name"]).unwrap();
        assert_eq!(step2, field);
    }

    #[test]
    fn test_nested_id_rejects_bad_namespace() {
        let typ = ElemID::new("salesforce", "Account");
        assert!(typ.create_nested_id(&["nope", "Name"]).is_err());
    }

    #[test]
    fn test_parent_id() {
        let nested = ElemID::from_parts(
            "salesforce",
            "Account",
            ElemIdType::Instance,
            vec!["prod".to_string(), "address".to_string()],
        );
        let parent = nested.create_parent_id();
        assert_eq!(parent.get_full_name(), "salesforce.Account.instance.prod");
        // top-level instance is its own parent's parent stops at itself
        assert_eq!(parent.create_parent_id(), parent);
    }

    #[test]
    fn test_top_level_parent_id() {
        let nested = ElemID::from_parts(
            "salesforce",
            "Account",
            ElemIdType::Instance,
            vec!["prod".to_string(), "address".to_string(), "city".to_string()],
        );
        let (top, path) = nested.create_top_level_parent_id();
        assert_eq!(top.get_full_name(), "salesforce.Account.instance.prod");
        assert_eq!(path, vec!["address".to_string(), "city".to_string()]);

        // idempotent at the top level
        let (top2, path2) = top.create_top_level_parent_id();
        assert_eq!(top2, top);
        assert!(path2.is_empty());

        let field = ElemID::from_parts(
            "salesforce",
            "Account",
            ElemIdType::Field,
            vec!["Name".to_string()],
        );
        let (top3, path3) = field.create_top_level_parent_id();
        assert_eq!(top3.get_full_name(), "salesforce.Account");
        assert_eq!(path3, vec!["Name".to_string()]);
    }

    #[test]
    fn test_is_parent_of() {
        let typ = ElemID::new("salesforce", "Account");
        let field = typ.create_nested_id(&["field", "Name"]).unwrap();
        assert!(typ.is_parent_of(&field));
        assert!(!field.is_parent_of(&typ));
        assert!(!typ.is_parent_of(&typ));
        // no false positives on name prefixes
        let other = ElemID::new("salesforce", "AccountHistory");
        assert!(!typ.is_parent_of(&other));
    }

    #[test]
    fn test_serde_round_trip() {
        let id = ElemID::from_parts(
            "salesforce",
            "Account",
            ElemIdType::Field,
            vec!["Name".to_string()],
        );
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"salesforce.Account.field.Name\"");
        let back: ElemID = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
