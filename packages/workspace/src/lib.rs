pub mod cache;
pub mod config;
pub mod errors;
pub mod hidden;
pub mod multi_env;
pub mod nacl_file_source;
pub mod routing;
pub mod state;
pub mod watcher;
pub mod workspace;

pub use cache::{content_hash, ParseCache};
pub use config::{workspace_root, WorkspaceConfig, WORKSPACE_ROOT_VAR};
pub use errors::{group_errors, CollectedError, EnrichedError, Errors, SourceFragment, WorkspaceError};
pub use hidden::{apply_hidden_overlay, handle_hidden_changes, strip_hidden_values};
pub use multi_env::{split_layer, Layer, MultiEnvSource};
pub use nacl_file_source::{NaclFile, NaclFileSource};
pub use routing::{route_changes, RoutedChanges, RoutingMode};
pub use state::{StateRecency, StateStore};
pub use watcher::FileWatcher;
pub use workspace::Workspace;
