use nacl_model::{ElemID, Severity};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Unresolved reference at {elem_id}: {target} does not exist")]
    UnresolvedReference { elem_id: ElemID, target: ElemID },

    #[error("Circular reference at {elem_id}")]
    CircularReference { elem_id: ElemID },

    #[error("Illegal value at {elem_id}: {message}")]
    IllegalValue { elem_id: ElemID, message: String },

    #[error("Missing required field {field} on {elem_id}")]
    MissingRequired { elem_id: ElemID, field: String },

    #[error("Invalid static file at {elem_id}: {filepath}")]
    InvalidStaticFile { elem_id: ElemID, filepath: String },
}

impl ValidationError {
    pub fn elem_id(&self) -> &ElemID {
        match self {
            ValidationError::UnresolvedReference { elem_id, .. } => elem_id,
            ValidationError::CircularReference { elem_id } => elem_id,
            ValidationError::IllegalValue { elem_id, .. } => elem_id,
            ValidationError::MissingRequired { elem_id, .. } => elem_id,
            ValidationError::InvalidStaticFile { elem_id, .. } => elem_id,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            // unknown instance entries and the like are warnings; the
            // structural rules are hard errors
            ValidationError::IllegalValue { message, .. }
                if message.starts_with("Unknown field") =>
            {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }

    pub fn top_level_id(&self) -> ElemID {
        self.elem_id().create_top_level_parent_id().0
    }

    /// The element a fix would most likely touch: the reference target
    /// for unresolved references, the element itself otherwise. Drives
    /// incremental re-validation in the editor.
    pub fn related_id(&self) -> ElemID {
        match self {
            ValidationError::UnresolvedReference { target, .. } => {
                target.create_top_level_parent_id().0
            }
            other => other.top_level_id(),
        }
    }
}
