use thiserror::Error;

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("Workspace error: {0}")]
    Workspace(#[from] nacl_workspace::WorkspaceError),

    #[error("Path is outside the workspace: {0}")]
    PathOutsideWorkspace(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
