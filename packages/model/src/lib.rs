pub mod change;
pub mod elem_id;
pub mod elements;
pub mod severity;
pub mod values;
pub mod walker;

pub use change::{Change, ChangeAction, ChangePayload, DetailedChange};
pub use elem_id::{ElemID, ElemIdError, ElemIdType, VAR_NAMESPACE};
pub use elements::{
    annotations, AnnotationTypes, Annotations, Element, Field, InstanceElement, ObjectType,
    PrimitiveKind, PrimitiveType, TypeRef, Variable, BUILTIN_ADAPTER,
};
pub use severity::Severity;
pub use values::{ReferenceExpression, StaticFile, Value};
pub use walker::{transform_element, transform_value, ValueMapper};
