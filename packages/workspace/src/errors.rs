use nacl_merger::MergeError;
use nacl_model::{ElemID, Severity};
use nacl_parser::{ParseError, SourceRange};
use nacl_validator::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Structural workspace-lifecycle failures. Unlike pipeline errors these
/// fail the operation immediately instead of accumulating.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Environment already exists: {0}")]
    EnvDuplication(String),

    #[error("Unknown environment: {0}")]
    UnknownEnv(String),

    #[error("Cannot delete the current environment: {0}")]
    DeleteCurrentEnv(String),

    #[error("Service already configured: {0}")]
    ServiceDuplication(String),

    #[error("Invalid workspace config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Any error collected (never thrown) by the parse → merge → validate
/// pipeline
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollectedError {
    #[error(transparent)]
    Parse(ParseError),

    #[error(transparent)]
    Merge(MergeError),

    #[error(transparent)]
    Validation(ValidationError),
}

impl CollectedError {
    pub fn severity(&self) -> Severity {
        match self {
            CollectedError::Parse(e) => e.severity,
            CollectedError::Merge(e) => e.severity(),
            CollectedError::Validation(e) => e.severity(),
        }
    }

    /// Top-level element the error is scoped to; parse errors carry a
    /// source range instead
    pub fn top_level_id(&self) -> Option<ElemID> {
        match self {
            CollectedError::Parse(_) => None,
            CollectedError::Merge(e) => Some(e.top_level_id()),
            CollectedError::Validation(e) => Some(e.top_level_id()),
        }
    }
}

/// The full error state of a workspace, replaced atomically per batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Errors {
    pub parse: Vec<ParseError>,
    pub merge: Vec<MergeError>,
    pub validation: Vec<ValidationError>,
}

impl Errors {
    pub fn has_errors(&self) -> bool {
        !self.parse.is_empty() || !self.merge.is_empty() || !self.validation.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = CollectedError> + '_ {
        self.parse
            .iter()
            .cloned()
            .map(CollectedError::Parse)
            .chain(self.merge.iter().cloned().map(CollectedError::Merge))
            .chain(
                self.validation
                    .iter()
                    .cloned()
                    .map(CollectedError::Validation),
            )
    }
}

/// A slice of source text an error points at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFragment {
    pub source_range: SourceRange,
    pub fragment: String,
}

/// An error enriched with the source fragments of its element, ready to
/// show to a human
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedError {
    pub error: CollectedError,
    pub source_fragments: Vec<SourceFragment>,
}

/// Group pipeline errors by the top-level element they are scoped to, so
/// clients can show one entry per element with all fragments attached.
/// Parse errors group under their filename instead.
pub fn group_errors(errors: impl IntoIterator<Item = CollectedError>) -> BTreeMap<String, Vec<CollectedError>> {
    let mut groups: BTreeMap<String, Vec<CollectedError>> = BTreeMap::new();
    for error in errors {
        let key = match &error {
            CollectedError::Parse(e) => e.subject.filename.clone(),
            other => other
                .top_level_id()
                .map(|id| id.get_full_name())
                .unwrap_or_default(),
        };
        groups.entry(key).or_default().push(error);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_errors_by_element() {
        let account = ElemID::new("salesforce", "Account");
        let field_a = account.create_nested_id(&["field", "a"]).unwrap();
        let field_b = account.create_nested_id(&["field", "b"]).unwrap();
        let other = ElemID::new("salesforce", "Contact");

        let groups = group_errors([
            CollectedError::Merge(MergeError::DuplicateAnnotation { elem_id: field_a }),
            CollectedError::Merge(MergeError::DuplicateAnnotation { elem_id: field_b }),
            CollectedError::Validation(ValidationError::CircularReference { elem_id: other }),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups["salesforce.Account"].len(), 2);
        assert_eq!(groups["salesforce.Contact"].len(), 1);
    }
}
