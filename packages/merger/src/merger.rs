//! # Element merger
//!
//! Folds the element fragments parsed from individual files into one
//! canonical element per top-level name. Merging is pure: identical
//! fragment inputs produce identical outputs, which lets the workspace
//! cache merged results per top-level ID and re-merge only what changed.

use crate::error::MergeError;
use nacl_model::{Element, ElemID, InstanceElement, ObjectType, PrimitiveType, Value, Variable};
use std::collections::BTreeMap;

/// One file's contribution to an element
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub element: Element,
    pub filename: String,
}

impl Fragment {
    pub fn new(element: Element, filename: impl Into<String>) -> Self {
        Self {
            element,
            filename: filename.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeResult {
    /// Keyed by `elem.elem_id().get_full_name()`
    pub merged: BTreeMap<String, Element>,
    pub errors: Vec<MergeError>,
}

/// Merge a stream of fragments into canonical elements.
///
/// Fragments of the same element coming from the same file merge
/// last-writer-wins; fragments from different files conflict loudly.
pub fn merge_elements(fragments: impl IntoIterator<Item = Fragment>) -> MergeResult {
    let mut groups: BTreeMap<String, Vec<Fragment>> = BTreeMap::new();
    for fragment in fragments {
        groups
            .entry(fragment.element.elem_id().get_full_name())
            .or_default()
            .push(fragment);
    }

    let mut result = MergeResult::default();
    for (full_name, group) in groups {
        let (element, errors) = merge_group(group);
        result.errors.extend(errors);
        result.merged.insert(full_name, element);
    }
    result
}

/// Merge the fragments of a single top-level element
pub fn merge_group(group: Vec<Fragment>) -> (Element, Vec<MergeError>) {
    let mut errors = Vec::new();
    let mut fragments = group.into_iter();
    let first = fragments.next().expect("groups are never empty");
    let first_kind = first.element.kind_name();
    let elem_id = first.element.elem_id().clone();

    // fragments that disagree on the element kind poison the group; keep
    // the first fragment so downstream stages still see the element
    let (same_kind, mismatched): (Vec<Fragment>, Vec<Fragment>) = fragments
        .partition(|fragment| fragment.element.kind_name() == first_kind);
    for fragment in mismatched {
        errors.push(MergeError::Duplication {
            elem_id: elem_id.clone(),
            first_kind: first_kind.to_string(),
            second_kind: fragment.element.kind_name().to_string(),
        });
    }

    let merged = match first.element {
        Element::Object(object) => {
            let rest = same_kind.into_iter().map(|f| match f.element {
                Element::Object(o) => (o, f.filename),
                _ => unreachable!("partitioned by kind"),
            });
            Element::Object(merge_objects(object, first.filename, rest, &mut errors))
        }
        Element::Instance(instance) => {
            let rest = same_kind.into_iter().map(|f| match f.element {
                Element::Instance(i) => (i, f.filename),
                _ => unreachable!("partitioned by kind"),
            });
            Element::Instance(merge_instances(instance, first.filename, rest, &mut errors))
        }
        Element::Primitive(primitive) => {
            let rest = same_kind.into_iter().map(|f| match f.element {
                Element::Primitive(p) => (p, f.filename),
                _ => unreachable!("partitioned by kind"),
            });
            Element::Primitive(merge_primitives(primitive, first.filename, rest, &mut errors))
        }
        Element::Variable(variable) => {
            for _ in same_kind {
                errors.push(MergeError::Duplication {
                    elem_id: elem_id.clone(),
                    first_kind: "variable".to_string(),
                    second_kind: "variable".to_string(),
                });
            }
            Element::Variable(variable)
        }
    };

    (merged, errors)
}

fn merge_objects(
    mut base: ObjectType,
    base_file: String,
    rest: impl Iterator<Item = (ObjectType, String)>,
    errors: &mut Vec<MergeError>,
) -> ObjectType {
    let mut field_sources: BTreeMap<String, String> = base
        .fields
        .keys()
        .map(|name| (name.clone(), base_file.clone()))
        .collect();
    let mut anno_file = base_file;

    for (incoming, filename) in rest {
        if incoming.is_settings != base.is_settings {
            errors.push(MergeError::ConflictingSetting {
                elem_id: base.elem_id.clone(),
            });
        }

        for (name, field) in incoming.fields {
            match base.fields.get(&name) {
                None => {
                    field_sources.insert(name.clone(), filename.clone());
                    base.fields.insert(name, field);
                }
                Some(existing) if existing.type_ref != field.type_ref => {
                    errors.push(MergeError::ConflictingFieldType {
                        elem_id: field.elem_id(),
                        first_type: existing.type_ref.to_string(),
                        second_type: field.type_ref.to_string(),
                    });
                }
                Some(_) => {
                    errors.push(MergeError::DuplicateAnnotation {
                        elem_id: field.elem_id(),
                    });
                }
            }
        }

        merge_annotation_map(
            &mut base.annotations,
            incoming.annotations,
            &base.elem_id,
            "attr",
            &anno_file,
            &filename,
            errors,
        );
        for (name, type_ref) in incoming.annotation_types {
            if !base.annotation_types.contains_key(&name) {
                base.annotation_types.insert(name, type_ref);
            } else if anno_file != filename {
                errors.push(MergeError::DuplicateAnnotation {
                    elem_id: base
                        .elem_id
                        .create_nested_id(&["annotation", &name])
                        .expect("type-level ID"),
                });
            } else {
                base.annotation_types.insert(name, type_ref);
            }
        }

        if base.path.is_none() {
            base.path = incoming.path;
        }
        anno_file = filename;
    }

    base
}

fn merge_instances(
    mut base: InstanceElement,
    base_file: String,
    rest: impl Iterator<Item = (InstanceElement, String)>,
    errors: &mut Vec<MergeError>,
) -> InstanceElement {
    let mut current_file = base_file;
    for (incoming, filename) in rest {
        let same_file = current_file == filename;
        merge_value_maps(
            &mut base.value,
            incoming.value,
            &base.elem_id,
            same_file,
            errors,
        );
        merge_annotation_map(
            &mut base.annotations,
            incoming.annotations,
            &base.elem_id,
            "",
            &current_file,
            &filename,
            errors,
        );
        if base.path.is_none() {
            base.path = incoming.path;
        }
        current_file = filename;
    }
    base
}

fn merge_primitives(
    mut base: PrimitiveType,
    base_file: String,
    rest: impl Iterator<Item = (PrimitiveType, String)>,
    errors: &mut Vec<MergeError>,
) -> PrimitiveType {
    let mut current_file = base_file;
    for (incoming, filename) in rest {
        if incoming.kind != base.kind {
            errors.push(MergeError::Duplication {
                elem_id: base.elem_id.clone(),
                first_kind: base.kind.name().to_string(),
                second_kind: incoming.kind.name().to_string(),
            });
            continue;
        }
        merge_annotation_map(
            &mut base.annotations,
            incoming.annotations,
            &base.elem_id,
            "attr",
            &current_file,
            &filename,
            errors,
        );
        if base.path.is_none() {
            base.path = incoming.path;
        }
        current_file = filename;
    }
    base
}

/// Structural merge of two instance value trees. Maps merge recursively;
/// anything else at the same path is a duplicate key unless both sides
/// came from the same file (last writer wins within a file).
fn merge_value_maps(
    base: &mut BTreeMap<String, Value>,
    incoming: BTreeMap<String, Value>,
    parent_id: &ElemID,
    same_file: bool,
    errors: &mut Vec<MergeError>,
) {
    for (key, value) in incoming {
        let entry_id = parent_id
            .create_nested_id(&[&key])
            .unwrap_or_else(|_| parent_id.clone());
        match base.get_mut(&key) {
            None => {
                base.insert(key, value);
            }
            Some(Value::Map(existing)) => {
                if let Value::Map(incoming_map) = value {
                    merge_value_maps(existing, incoming_map, &entry_id, same_file, errors);
                } else if same_file {
                    base.insert(key, value);
                } else {
                    errors.push(MergeError::DuplicateInstanceKey { elem_id: entry_id });
                }
            }
            Some(_) => {
                if same_file {
                    base.insert(key, value);
                } else {
                    errors.push(MergeError::DuplicateInstanceKey { elem_id: entry_id });
                }
            }
        }
    }
}

fn merge_annotation_map(
    base: &mut BTreeMap<String, Value>,
    incoming: BTreeMap<String, Value>,
    owner: &ElemID,
    namespace: &str,
    base_file: &str,
    incoming_file: &str,
    errors: &mut Vec<MergeError>,
) {
    let same_file = base_file == incoming_file;
    for (key, value) in incoming {
        if !base.contains_key(&key) || same_file {
            base.insert(key, value);
        } else {
            let parts: Vec<&str> = if namespace.is_empty() {
                vec![key.as_str()]
            } else {
                vec![namespace, key.as_str()]
            };
            errors.push(MergeError::DuplicateAnnotation {
                elem_id: owner
                    .create_nested_id(&parts)
                    .unwrap_or_else(|_| owner.clone()),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nacl_model::{annotations, Field, PrimitiveKind, TypeRef};

    fn account_id() -> ElemID {
        ElemID::new("salesforce", "Account")
    }

    fn object_with_field(field_name: &str) -> ObjectType {
        ObjectType::new(account_id()).with_fields([Field::new(
            account_id(),
            field_name,
            TypeRef::primitive(PrimitiveKind::String),
        )])
    }

    #[test]
    fn test_merge_fields_across_files() {
        let result = merge_elements([
            Fragment::new(Element::Object(object_with_field("Name")), "a.nacl"),
            Fragment::new(Element::Object(object_with_field("Email")), "b.nacl"),
        ]);
        assert!(result.errors.is_empty());
        let merged = result.merged["salesforce.Account"].as_object().unwrap();
        assert_eq!(merged.fields.len(), 2);
    }

    #[test]
    fn test_duplicate_field_across_files() {
        let result = merge_elements([
            Fragment::new(Element::Object(object_with_field("Name")), "a.nacl"),
            Fragment::new(Element::Object(object_with_field("Name")), "b.nacl"),
        ]);
        assert_eq!(result.errors.len(), 1);
        match &result.errors[0] {
            MergeError::DuplicateAnnotation { elem_id } => {
                assert_eq!(elem_id.get_full_name(), "salesforce.Account.field.Name");
            }
            other => panic!("expected duplicate annotation, got {:?}", other),
        }
        // the element survives with a single field
        let merged = result.merged["salesforce.Account"].as_object().unwrap();
        assert_eq!(merged.fields.len(), 1);
    }

    #[test]
    fn test_conflicting_field_type() {
        let mut other = ObjectType::new(account_id());
        other.fields.insert(
            "Name".to_string(),
            Field::new(account_id(), "Name", TypeRef::primitive(PrimitiveKind::Number)),
        );
        let result = merge_elements([
            Fragment::new(Element::Object(object_with_field("Name")), "a.nacl"),
            Fragment::new(Element::Object(other), "b.nacl"),
        ]);
        assert!(matches!(
            result.errors[0],
            MergeError::ConflictingFieldType { .. }
        ));
    }

    #[test]
    fn test_kind_mismatch_keeps_first_fragment() {
        let instance_id = account_id().create_nested_id(&["instance", "x"]).unwrap();
        let result = merge_elements([
            Fragment::new(
                Element::Instance(InstanceElement::new(
                    instance_id.clone(),
                    TypeRef::Named(account_id()),
                )),
                "a.nacl",
            ),
            Fragment::new(
                Element::Variable(Variable {
                    elem_id: instance_id.clone(),
                    value: Value::Bool(true),
                    path: None,
                }),
                "b.nacl",
            ),
        ]);
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(result.errors[0], MergeError::Duplication { .. }));
        assert!(result.merged["salesforce.Account.instance.x"]
            .as_instance()
            .is_some());
    }

    #[test]
    fn test_instance_value_merge_and_conflict() {
        let id = account_id().create_nested_id(&["instance", "prod"]).unwrap();
        let mut first = InstanceElement::new(id.clone(), TypeRef::Named(account_id()));
        first
            .value
            .insert("name".to_string(), Value::String("a".to_string()));
        first.value.insert(
            "address".to_string(),
            Value::map([("city".to_string(), Value::String("SF".to_string()))]),
        );

        let mut second = InstanceElement::new(id.clone(), TypeRef::Named(account_id()));
        second
            .value
            .insert("name".to_string(), Value::String("b".to_string()));
        second.value.insert(
            "address".to_string(),
            Value::map([("zip".to_string(), Value::String("94107".to_string()))]),
        );

        let result = merge_elements([
            Fragment::new(Element::Instance(first), "a.nacl"),
            Fragment::new(Element::Instance(second), "b.nacl"),
        ]);

        // nested maps merge structurally, the primitive clash errors
        assert_eq!(result.errors.len(), 1);
        match &result.errors[0] {
            MergeError::DuplicateInstanceKey { elem_id } => {
                assert_eq!(
                    elem_id.get_full_name(),
                    "salesforce.Account.instance.prod.name"
                );
            }
            other => panic!("unexpected error {:?}", other),
        }
        let merged = result.merged["salesforce.Account.instance.prod"]
            .as_instance()
            .unwrap();
        let address = merged.value["address"].as_map().unwrap();
        assert_eq!(address.len(), 2);
        // first writer wins on the conflict
        assert_eq!(merged.value["name"], Value::String("a".to_string()));
    }

    #[test]
    fn test_same_file_annotations_last_writer_wins() {
        let mut first = ObjectType::new(account_id());
        first
            .annotations
            .insert(annotations::REQUIRED.to_string(), Value::Bool(false));
        let mut second = ObjectType::new(account_id());
        second
            .annotations
            .insert(annotations::REQUIRED.to_string(), Value::Bool(true));

        let result = merge_elements([
            Fragment::new(Element::Object(first.clone()), "a.nacl"),
            Fragment::new(Element::Object(second.clone()), "a.nacl"),
        ]);
        assert!(result.errors.is_empty());
        let merged = result.merged["salesforce.Account"].as_object().unwrap();
        assert_eq!(
            merged.annotations[annotations::REQUIRED],
            Value::Bool(true)
        );

        // the same clash across two files is an error
        let result = merge_elements([
            Fragment::new(Element::Object(first), "a.nacl"),
            Fragment::new(Element::Object(second), "b.nacl"),
        ]);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_conflicting_settings_flag() {
        let mut settings = ObjectType::new(account_id());
        settings.is_settings = true;
        let result = merge_elements([
            Fragment::new(Element::Object(ObjectType::new(account_id())), "a.nacl"),
            Fragment::new(Element::Object(settings), "b.nacl"),
        ]);
        assert!(matches!(
            result.errors[0],
            MergeError::ConflictingSetting { .. }
        ));
    }

    #[test]
    fn test_merge_is_deterministic() {
        let fragments = vec![
            Fragment::new(Element::Object(object_with_field("Name")), "a.nacl"),
            Fragment::new(Element::Object(object_with_field("Email")), "b.nacl"),
            Fragment::new(Element::Object(object_with_field("Phone")), "c.nacl"),
        ];
        let first = merge_elements(fragments.clone());
        let second = merge_elements(fragments);
        assert_eq!(first, second);
    }

    #[test]
    fn test_merged_map_keys_match_elem_ids() {
        let result = merge_elements([
            Fragment::new(Element::Object(object_with_field("Name")), "a.nacl"),
            Fragment::new(
                Element::Variable(Variable {
                    elem_id: ElemID::variable("region"),
                    value: Value::String("us".to_string()),
                    path: None,
                }),
                "a.nacl",
            ),
        ]);
        for (key, element) in &result.merged {
            assert_eq!(key, &element.elem_id().get_full_name());
        }
    }
}
