use nacl_model::{ElemID, Severity};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MergeError {
    #[error("Duplicate definitions of {elem_id} with conflicting kinds: {first_kind} vs {second_kind}")]
    Duplication {
        elem_id: ElemID,
        first_kind: String,
        second_kind: String,
    },

    #[error("Duplicate annotation definition: {elem_id}")]
    DuplicateAnnotation { elem_id: ElemID },

    #[error("Duplicate key in instance: {elem_id}")]
    DuplicateInstanceKey { elem_id: ElemID },

    #[error("Field {elem_id} redefined with a different type: {first_type} vs {second_type}")]
    ConflictingFieldType {
        elem_id: ElemID,
        first_type: String,
        second_type: String,
    },

    #[error("Conflicting settings flag on {elem_id}")]
    ConflictingSetting { elem_id: ElemID },
}

impl MergeError {
    pub fn elem_id(&self) -> &ElemID {
        match self {
            MergeError::Duplication { elem_id, .. } => elem_id,
            MergeError::DuplicateAnnotation { elem_id } => elem_id,
            MergeError::DuplicateInstanceKey { elem_id } => elem_id,
            MergeError::ConflictingFieldType { elem_id, .. } => elem_id,
            MergeError::ConflictingSetting { elem_id } => elem_id,
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Error
    }

    /// The top-level element this error is scoped to, for incremental
    /// error invalidation
    pub fn top_level_id(&self) -> ElemID {
        self.elem_id().create_top_level_parent_id().0
    }
}
