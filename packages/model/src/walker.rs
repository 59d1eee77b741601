//! # Value transform walker
//!
//! Shared traversal used for value rewriting, element cloning and the
//! hidden-state overlay. The walker hands every value to a callback along
//! with the ID path it sits at and (where known) the field that declares
//! it; the callback decides whether to keep, rewrite or prune the value.

use crate::elem_id::ElemID;
use crate::elements::{Element, Field};
use crate::values::Value;
use std::collections::BTreeMap;

/// Decision callback: `None` prunes the value, `Some` keeps the returned
/// value (which may differ from the input).
pub trait ValueMapper {
    fn map(&mut self, value: Value, id: &ElemID, field: Option<&Field>) -> Option<Value>;
}

impl<F> ValueMapper for F
where
    F: FnMut(Value, &ElemID, Option<&Field>) -> Option<Value>,
{
    fn map(&mut self, value: Value, id: &ElemID, field: Option<&Field>) -> Option<Value> {
        self(value, id, field)
    }
}

/// Transform a value tree.
///
/// - Reference expressions short-circuit: the callback sees them, but the
///   walker never descends into a reference (rewritten or not).
/// - List items keep their positions in the ID path (`.0`, `.1`, ...).
/// - Containers whose entries were all pruned are dropped; containers that
///   were empty to begin with survive.
///
/// The `field` hint is threaded for the direct entries of an instance
/// value; deeper levels pass `None` (resolving nested field types needs
/// the element universe, which is the validator's concern).
pub fn transform_value<M: ValueMapper>(
    value: Value,
    id: &ElemID,
    field: Option<&Field>,
    mapper: &mut M,
) -> Option<Value> {
    let mapped = mapper.map(value, id, field)?;
    match mapped {
        Value::Reference(_) => Some(mapped),
        Value::List(items) => {
            let had_items = !items.is_empty();
            let transformed: Vec<Value> = items
                .into_iter()
                .enumerate()
                .filter_map(|(index, item)| {
                    let item_id = id.create_nested_id(&[&index.to_string()]).ok()?;
                    transform_value(item, &item_id, None, mapper)
                })
                .collect();
            if had_items && transformed.is_empty() {
                None
            } else {
                Some(Value::List(transformed))
            }
        }
        Value::Map(entries) => {
            let had_entries = !entries.is_empty();
            let transformed: BTreeMap<String, Value> = entries
                .into_iter()
                .filter_map(|(key, entry)| {
                    let entry_id = id.create_nested_id(&[&key]).ok()?;
                    transform_value(entry, &entry_id, None, mapper).map(|v| (key, v))
                })
                .collect();
            if had_entries && transformed.is_empty() {
                None
            } else {
                Some(Value::Map(transformed))
            }
        }
        other => Some(other),
    }
}

/// Transform an element's values and annotations in place.
///
/// Instance values get the declaring field threaded for their top-level
/// entries when the instance's type is known to the caller.
pub fn transform_element<M: ValueMapper>(
    mut element: Element,
    fields: Option<&BTreeMap<String, Field>>,
    mapper: &mut M,
) -> Element {
    match &mut element {
        Element::Instance(instance) => {
            let id = instance.elem_id.clone();
            let old_value = std::mem::take(&mut instance.value);
            instance.value = old_value
                .into_iter()
                .filter_map(|(key, value)| {
                    let field = fields.and_then(|f| f.get(&key));
                    let entry_id = id.create_nested_id(&[&key]).ok()?;
                    transform_value(value, &entry_id, field, mapper).map(|v| (key, v))
                })
                .collect();
        }
        Element::Variable(variable) => {
            let id = variable.elem_id.clone();
            if let Some(value) =
                transform_value(std::mem::replace(&mut variable.value, Value::Dynamic), &id, None, mapper)
            {
                variable.value = value;
            }
        }
        Element::Primitive(_) | Element::Object(_) => {}
    }

    // annotations are walked for every element kind that has them
    if let Element::Instance(instance) = &mut element {
        let id = instance.elem_id.clone();
        transform_annotations(&mut instance.annotations, &id, mapper);
    } else if let Element::Object(object) = &mut element {
        let id = object.elem_id.clone();
        transform_annotations(&mut object.annotations, &id, mapper);
    } else if let Element::Primitive(primitive) = &mut element {
        let id = primitive.elem_id.clone();
        transform_annotations(&mut primitive.annotations, &id, mapper);
    }

    element
}

fn transform_annotations<M: ValueMapper>(
    annotations: &mut BTreeMap<String, Value>,
    owner: &ElemID,
    mapper: &mut M,
) {
    let old = std::mem::take(annotations);
    *annotations = old
        .into_iter()
        .filter_map(|(key, value)| {
            let anno_id = match owner.id_type() {
                crate::elem_id::ElemIdType::Instance => owner.create_nested_id(&[&key]).ok()?,
                _ => owner.create_nested_id(&["attr", &key]).ok()?,
            };
            transform_value(value, &anno_id, None, mapper).map(|v| (key, v))
        })
        .collect();
}
