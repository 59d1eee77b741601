use crate::elem_id::ElemID;
use crate::elements::Element;
use crate::values::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Add,
    Modify,
    Remove,
}

/// A change to one top-level element, as reported back to clients from
/// `set_nacl_files` / `remove_nacl_files`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub action: ChangeAction,
    pub id: ElemID,
    pub before: Option<Element>,
    pub after: Option<Element>,
}

impl Change {
    pub fn add(element: Element) -> Self {
        Self {
            action: ChangeAction::Add,
            id: element.elem_id().clone(),
            before: None,
            after: Some(element),
        }
    }

    pub fn modify(before: Element, after: Element) -> Self {
        Self {
            action: ChangeAction::Modify,
            id: after.elem_id().clone(),
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn remove(element: Element) -> Self {
        Self {
            action: ChangeAction::Remove,
            id: element.elem_id().clone(),
            before: Some(element),
            after: None,
        }
    }
}

/// Payload of a detailed change: a whole element for top-level IDs, a
/// value for nested ones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangePayload {
    Element(Box<Element>),
    Value(Value),
}

impl ChangePayload {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ChangePayload::Value(v) => Some(v),
            ChangePayload::Element(_) => None,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            ChangePayload::Element(e) => Some(e),
            ChangePayload::Value(_) => None,
        }
    }
}

/// A change submitted by clients through `update_nacl_files`.
///
/// `path` is a file-path hint: when present it names the path segments of
/// the NaCl file the change should land in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedChange {
    pub id: ElemID,
    pub action: ChangeAction,
    pub before: Option<ChangePayload>,
    pub after: Option<ChangePayload>,
    pub path: Option<Vec<String>>,
}

impl DetailedChange {
    pub fn add(id: ElemID, after: ChangePayload) -> Self {
        Self {
            id,
            action: ChangeAction::Add,
            before: None,
            after: Some(after),
            path: None,
        }
    }

    pub fn modify(id: ElemID, before: ChangePayload, after: ChangePayload) -> Self {
        Self {
            id,
            action: ChangeAction::Modify,
            before: Some(before),
            after: Some(after),
            path: None,
        }
    }

    pub fn remove(id: ElemID, before: ChangePayload) -> Self {
        Self {
            id,
            action: ChangeAction::Remove,
            before: Some(before),
            after: None,
            path: None,
        }
    }

    pub fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = Some(path);
        self
    }

    pub fn is_top_level(&self) -> bool {
        self.id.is_top_level()
    }

    /// The top-level element this change belongs to
    pub fn top_level_id(&self) -> ElemID {
        self.id.create_top_level_parent_id().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::ObjectType;

    #[test]
    fn test_change_constructors() {
        let obj = Element::Object(ObjectType::new(ElemID::new("salesforce", "Account")));
        let change = Change::add(obj.clone());
        assert_eq!(change.action, ChangeAction::Add);
        assert_eq!(change.id.get_full_name(), "salesforce.Account");
        assert!(change.before.is_none());

        let removed = Change::remove(obj);
        assert_eq!(removed.action, ChangeAction::Remove);
        assert!(removed.after.is_none());
    }

    #[test]
    fn test_detailed_change_top_level_id() {
        let nested = ElemID::from_full_name("salesforce.Account.instance.prod.address").unwrap();
        let change = DetailedChange::remove(
            nested,
            ChangePayload::Value(Value::String("gone".to_string())),
        );
        assert!(!change.is_top_level());
        assert_eq!(
            change.top_level_id().get_full_name(),
            "salesforce.Account.instance.prod"
        );
    }
}
