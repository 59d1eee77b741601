//! # Change routing
//!
//! Decides, per detailed change, which layer's files receive the edit.

use crate::nacl_file_source::NaclFileSource;
use nacl_model::{ChangeAction, ChangePayload, DetailedChange};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Follow the element: edits to common elements go to common,
    /// everything else to the current env
    Default,
    /// Everything goes to the current env
    Isolated,
    /// Everything goes to the current env; removals of elements that
    /// exist only in common are dropped (common stays untouched)
    Align,
    /// Everything goes to the current env and conflicting common
    /// content is removed
    Override,
}

/// Changes split by destination layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutedChanges {
    pub common: Vec<DetailedChange>,
    pub env: Vec<DetailedChange>,
}

pub fn route_changes(
    mode: RoutingMode,
    changes: Vec<DetailedChange>,
    common: &NaclFileSource,
) -> RoutedChanges {
    let mut routed = RoutedChanges::default();
    for change in changes {
        let top = change.top_level_id();
        let in_common = common.has_element(&top);
        match mode {
            RoutingMode::Default => {
                if in_common {
                    routed.common.push(change);
                } else {
                    routed.env.push(change);
                }
            }
            RoutingMode::Isolated => routed.env.push(change),
            RoutingMode::Align => {
                if in_common && change.action == ChangeAction::Remove {
                    continue;
                }
                routed.env.push(change);
            }
            RoutingMode::Override => {
                if in_common {
                    if let Some(element) = common.get_element(&top) {
                        routed.common.push(DetailedChange::remove(
                            top.clone(),
                            ChangePayload::Element(Box::new(element)),
                        ));
                    }
                }
                routed.env.push(change);
            }
        }
    }
    routed
}
