//! # Hidden-state overlay
//!
//! Values marked `_hidden_value` live only in the fetched state, never
//! in NaCl files. The overlay merges them into the visible element view
//! on demand, and strips hidden-only changes before anything is routed
//! back to files.

use nacl_model::{
    annotations, transform_element, DetailedChange, Element, ElemID, ElemIdType, Field, Value,
};
use std::collections::{BTreeMap, BTreeSet};

/// Names of fields marked hidden, per type full name
fn hidden_fields_by_type(universe: &BTreeMap<String, Element>) -> BTreeMap<String, BTreeSet<String>> {
    let mut hidden: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (full_name, element) in universe {
        if let Element::Object(object) = element {
            let names: BTreeSet<String> = object
                .fields
                .values()
                .filter(|field| {
                    field
                        .annotations
                        .get(annotations::HIDDEN_VALUE)
                        .and_then(Value::as_bool)
                        .unwrap_or(false)
                })
                .map(|field| field.name.clone())
                .collect();
            if !names.is_empty() {
                hidden.insert(full_name.clone(), names);
            }
        }
    }
    hidden
}

/// Merge hidden state into the visible element map.
///
/// State-only elements marked hidden are added whole; elements present
/// in both get hidden field values and state-only annotations copied in.
pub fn apply_hidden_overlay(
    visible: &mut BTreeMap<String, Element>,
    state: &BTreeMap<String, Element>,
) {
    let hidden_fields = hidden_fields_by_type(visible);

    for (full_name, state_element) in state {
        match visible.get_mut(full_name) {
            None => {
                if state_element.is_hidden() {
                    visible.insert(full_name.clone(), state_element.clone());
                }
            }
            Some(Element::Instance(instance)) => {
                let Element::Instance(state_instance) = state_element else {
                    continue;
                };
                // state-only annotations are hidden by construction
                for (key, value) in &state_instance.annotations {
                    instance
                        .annotations
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
                let type_name = instance.type_ref.base_id().get_full_name();
                if let Some(hidden_names) = hidden_fields.get(&type_name) {
                    for name in hidden_names {
                        if let Some(value) = state_instance.value.get(name) {
                            instance
                                .value
                                .entry(name.clone())
                                .or_insert_with(|| value.clone());
                        }
                    }
                }
            }
            Some(_) => {}
        }
    }
}

/// Drop changes that only touch hidden content; hidden values never
/// surface in NaCl files
pub fn handle_hidden_changes(
    changes: Vec<DetailedChange>,
    universe: &BTreeMap<String, Element>,
) -> Vec<DetailedChange> {
    let hidden_fields = hidden_fields_by_type(universe);
    changes
        .into_iter()
        .filter(|change| {
            let (top, path) = change.id.create_top_level_parent_id();
            if let Some(element) = universe.get(&top.get_full_name()) {
                if element.is_hidden() {
                    return false;
                }
                if change.id.id_type() == ElemIdType::Instance && !path.is_empty() {
                    if let Element::Instance(instance) = element {
                        let type_name = instance.type_ref.base_id().get_full_name();
                        if hidden_fields
                            .get(&type_name)
                            .map(|names| names.contains(&path[0]))
                            .unwrap_or(false)
                        {
                            return false;
                        }
                    }
                }
            }
            true
        })
        .collect()
}

/// Drop hidden values from an element before it is written into NaCl
/// files. The inverse of the overlay: an element taken from the
/// hidden-inclusive view must shed those values on the way back out.
pub fn strip_hidden_values(element: Element, universe: &BTreeMap<String, Element>) -> Element {
    let fields = match &element {
        Element::Instance(instance) => universe
            .get(&instance.type_ref.base_id().get_full_name())
            .and_then(|e| e.as_object())
            .map(|object| object.fields.clone()),
        _ => None,
    };
    transform_element(
        element,
        fields.as_ref(),
        &mut |value: Value, _id: &ElemID, field: Option<&Field>| {
            let hidden = field
                .and_then(|f| f.annotations.get(annotations::HIDDEN_VALUE))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if hidden {
                None
            } else {
                Some(value)
            }
        },
    )
}
