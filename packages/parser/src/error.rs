use crate::ast::SourceRange;
use nacl_model::Severity;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A collected syntax or lowering error.
///
/// `context` spans the construct the parser was inside; `subject` narrows
/// to the offending token or identifier.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message} at {}:{}:{}", subject.filename, subject.start.line, subject.start.col)]
pub struct ParseError {
    pub message: String,
    pub context: SourceRange,
    pub subject: SourceRange,
    pub severity: Severity,
}

impl ParseError {
    pub fn new(message: impl Into<String>, context: SourceRange, subject: SourceRange) -> Self {
        Self {
            message: message.into(),
            context,
            subject,
            severity: Severity::Error,
        }
    }

    /// Error where the subject is the whole context
    pub fn at(message: impl Into<String>, range: SourceRange) -> Self {
        Self {
            message: message.into(),
            context: range.clone(),
            subject: range,
            severity: Severity::Error,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}
