use chrono::{DateTime, Duration, Utc};
use nacl_model::Element;
use std::collections::BTreeMap;

/// How fresh the last fetched state for a service is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateRecency {
    Nonexistent,
    Old,
    Valid,
}

/// Previously fetched elements for one environment, including hidden
/// values that never appear in NaCl files. Stores are shared by
/// reference between a workspace and its clones.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    elements: BTreeMap<String, Element>,
    update_times: BTreeMap<String, DateTime<Utc>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored elements for one service, stamping the update
    pub fn set_elements(&mut self, service: &str, elements: Vec<Element>) {
        self.elements
            .retain(|_, element| element.elem_id().adapter() != service);
        for element in elements {
            self.elements
                .insert(element.elem_id().get_full_name(), element);
        }
        self.update_times.insert(service.to_string(), Utc::now());
    }

    pub fn elements(&self) -> &BTreeMap<String, Element> {
        &self.elements
    }

    pub fn get(&self, full_name: &str) -> Option<&Element> {
        self.elements.get(full_name)
    }

    pub fn update_time(&self, service: &str) -> Option<DateTime<Utc>> {
        self.update_times.get(service).copied()
    }

    pub fn recency(&self, service: &str, threshold: Duration) -> StateRecency {
        match self.update_times.get(service) {
            None => StateRecency::Nonexistent,
            Some(updated) if Utc::now() - *updated > threshold => StateRecency::Old,
            Some(_) => StateRecency::Valid,
        }
    }

    pub fn clear(&mut self) {
        self.elements.clear();
        self.update_times.clear();
    }
}
