pub mod diagnostics;
pub mod editor_workspace;
pub mod errors;

pub use diagnostics::{create_report_errors_event_listener, PublishDiagnostics, DEFAULT_DEBOUNCE};
pub use editor_workspace::EditorWorkspace;
pub use errors::EditorError;
