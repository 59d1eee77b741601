use crate::elem_id::ElemID;
use crate::values::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Adapter namespace for the builtin primitive types (`string`, `number`, ...)
pub const BUILTIN_ADAPTER: &str = "builtin";

/// Core annotation names understood by the validator and the hidden overlay
pub mod annotations {
    pub const REQUIRED: &str = "_required";
    pub const VALUES: &str = "_values";
    pub const RESTRICTION: &str = "_restriction";
    pub const HIDDEN_VALUE: &str = "_hidden_value";

    pub const RESTRICTION_REGEX: &str = "regex";
    pub const RESTRICTION_MIN: &str = "min";
    pub const RESTRICTION_MAX: &str = "max";
    pub const RESTRICTION_ENFORCE: &str = "enforce_value";

    /// The fixed set of annotations an instance may carry
    pub const INSTANCE_ANNOTATIONS: &[&str] = &[
        "_depends_on",
        "_parent",
        "_generated_dependencies",
        "_service_id",
        HIDDEN_VALUE,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    String,
    Number,
    Boolean,
    Unknown,
}

impl PrimitiveKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(PrimitiveKind::String),
            "number" => Some(PrimitiveKind::Number),
            "boolean" => Some(PrimitiveKind::Boolean),
            "unknown" => Some(PrimitiveKind::Unknown),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveKind::String => "string",
            PrimitiveKind::Number => "number",
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Unknown => "unknown",
        }
    }

    /// The builtin type element ID for this kind
    pub fn elem_id(&self) -> ElemID {
        ElemID::new(BUILTIN_ADAPTER, self.name())
    }
}

/// A reference to a type: a named element, or a container wrapping one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeRef {
    Named(ElemID),
    List(Box<TypeRef>),
    Map(Box<TypeRef>),
}

impl TypeRef {
    pub fn primitive(kind: PrimitiveKind) -> Self {
        TypeRef::Named(kind.elem_id())
    }

    /// The named type at the bottom of any container nesting
    pub fn base_id(&self) -> &ElemID {
        match self {
            TypeRef::Named(id) => id,
            TypeRef::List(inner) | TypeRef::Map(inner) => inner.base_id(),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, TypeRef::List(_))
    }

    /// Builtin primitive kind, if this directly names one
    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        match self {
            TypeRef::Named(id) if id.adapter() == BUILTIN_ADAPTER => {
                PrimitiveKind::from_name(id.type_name())
            }
            _ => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(id) if id.adapter() == BUILTIN_ADAPTER => {
                write!(f, "{}", id.type_name())
            }
            TypeRef::Named(id) => write!(f, "{}", id.get_full_name()),
            TypeRef::List(inner) => write!(f, "list<{}>", inner),
            TypeRef::Map(inner) => write!(f, "map<{}>", inner),
        }
    }
}

pub type Annotations = BTreeMap<String, Value>;
pub type AnnotationTypes = BTreeMap<String, TypeRef>;

/// A field of an object type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// ID of the object type this field belongs to
    pub parent: ElemID,
    pub name: String,
    pub type_ref: TypeRef,
    pub annotations: Annotations,
}

impl Field {
    pub fn new(parent: ElemID, name: impl Into<String>, type_ref: TypeRef) -> Self {
        Self {
            parent,
            name: name.into(),
            type_ref,
            annotations: Annotations::new(),
        }
    }

    pub fn elem_id(&self) -> ElemID {
        // parent is always a type-level ID, so nesting cannot fail
        self.parent
            .create_nested_id(&["field", &self.name])
            .expect("field parent must be a type ID")
    }

    pub fn is_required(&self) -> bool {
        self.annotations
            .get(annotations::REQUIRED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveType {
    pub elem_id: ElemID,
    pub kind: PrimitiveKind,
    pub annotations: Annotations,
    pub annotation_types: AnnotationTypes,
    pub path: Option<Vec<String>>,
}

impl PrimitiveType {
    pub fn new(elem_id: ElemID, kind: PrimitiveKind) -> Self {
        Self {
            elem_id,
            kind,
            annotations: Annotations::new(),
            annotation_types: AnnotationTypes::new(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectType {
    pub elem_id: ElemID,
    pub fields: BTreeMap<String, Field>,
    pub annotations: Annotations,
    pub annotation_types: AnnotationTypes,
    pub is_settings: bool,
    pub path: Option<Vec<String>>,
}

impl ObjectType {
    pub fn new(elem_id: ElemID) -> Self {
        Self {
            elem_id,
            fields: BTreeMap::new(),
            annotations: Annotations::new(),
            annotation_types: AnnotationTypes::new(),
            is_settings: false,
            path: None,
        }
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        for field in fields {
            self.fields.insert(field.name.clone(), field);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceElement {
    pub elem_id: ElemID,
    pub type_ref: TypeRef,
    pub value: BTreeMap<String, Value>,
    pub annotations: Annotations,
    pub path: Option<Vec<String>>,
}

impl InstanceElement {
    pub fn new(elem_id: ElemID, type_ref: TypeRef) -> Self {
        Self {
            elem_id,
            type_ref,
            value: BTreeMap::new(),
            annotations: Annotations::new(),
            path: None,
        }
    }
}

/// A workspace variable (`vars { name = value }`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub elem_id: ElemID,
    pub value: Value,
    pub path: Option<Vec<String>>,
}

/// A top-level named entity in the workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Element {
    Primitive(PrimitiveType),
    Object(ObjectType),
    Instance(InstanceElement),
    Variable(Variable),
}

impl Element {
    pub fn elem_id(&self) -> &ElemID {
        match self {
            Element::Primitive(p) => &p.elem_id,
            Element::Object(o) => &o.elem_id,
            Element::Instance(i) => &i.elem_id,
            Element::Variable(v) => &v.elem_id,
        }
    }

    pub fn path(&self) -> Option<&[String]> {
        match self {
            Element::Primitive(p) => p.path.as_deref(),
            Element::Object(o) => o.path.as_deref(),
            Element::Instance(i) => i.path.as_deref(),
            Element::Variable(v) => v.path.as_deref(),
        }
    }

    pub fn set_path(&mut self, path: Option<Vec<String>>) {
        match self {
            Element::Primitive(p) => p.path = path,
            Element::Object(o) => o.path = path,
            Element::Instance(i) => i.path = path,
            Element::Variable(v) => v.path = path,
        }
    }

    pub fn annotations(&self) -> Option<&Annotations> {
        match self {
            Element::Primitive(p) => Some(&p.annotations),
            Element::Object(o) => Some(&o.annotations),
            Element::Instance(i) => Some(&i.annotations),
            Element::Variable(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectType> {
        match self {
            Element::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&InstanceElement> {
        match self {
            Element::Instance(i) => Some(i),
            _ => None,
        }
    }

    /// Element kind label used by merge errors
    pub fn kind_name(&self) -> &'static str {
        match self {
            Element::Primitive(_) => "primitive type",
            Element::Object(_) => "object type",
            Element::Instance(_) => "instance",
            Element::Variable(_) => "variable",
        }
    }

    /// Whether this element (or for instances, its own annotation) is
    /// marked as hidden state
    pub fn is_hidden(&self) -> bool {
        self.annotations()
            .and_then(|anno| anno.get(annotations::HIDDEN_VALUE))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
