//! # Editor workspace
//!
//! Wraps the core workspace for interactive editors. Edits are queued
//! into pending sets/deletes and drained by a single aggregated
//! operation, so rapid typing collapses into few workspace updates and
//! every query observes a consistent snapshot.
//!
//! Ordering guarantees:
//! - at most one aggregated set-operation runs at a time
//! - at most one workspace operation runs at a time
//! - an operation observes all effects of the operations before it

use crate::errors::EditorError;
use nacl_model::{Change, ChangeAction, Element, ElemID};
use nacl_validator::{validate_elements, ValidationError};
use nacl_parser::SourceRange;
use nacl_workspace::{Errors, NaclFile, Workspace};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Pending {
    /// filename → last written buffer
    sets: BTreeMap<String, String>,
    deletes: BTreeSet<String>,
}

pub struct EditorWorkspace {
    base_dir: PathBuf,
    workspace: Mutex<Workspace>,
    pending: Mutex<Pending>,
    /// serializes aggregated set-operations
    op_lock: Mutex<()>,
    /// incrementally maintained validation errors, per top-level element
    validation: Mutex<BTreeMap<String, Vec<ValidationError>>>,
}

impl EditorWorkspace {
    pub fn new(base_dir: impl Into<PathBuf>, workspace: Workspace) -> Arc<Self> {
        Arc::new(Self {
            base_dir: base_dir.into(),
            workspace: Mutex::new(workspace),
            pending: Mutex::new(Pending::default()),
            op_lock: Mutex::new(()),
            validation: Mutex::new(BTreeMap::new()),
        })
    }

    // --- path translation ---

    /// Relativize an editor path against the workspace base dir
    pub fn to_workspace_name(&self, path: &Path) -> Result<String, EditorError> {
        let relative = path.strip_prefix(&self.base_dir).unwrap_or(path);
        if relative.is_absolute() {
            return Err(EditorError::PathOutsideWorkspace(
                path.display().to_string(),
            ));
        }
        Ok(relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }

    pub fn to_absolute(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    // --- pending-edit queue ---

    /// Queue a buffer write and drain the queue. Last write wins per
    /// file.
    pub async fn set_nacl_files(&self, files: Vec<(PathBuf, String)>) -> Result<(), EditorError> {
        {
            let mut pending = self.pending.lock().await;
            for (path, buffer) in files {
                let name = self.to_workspace_name(&path)?;
                pending.deletes.remove(&name);
                pending.sets.insert(name, buffer);
            }
        }
        self.run_aggregated_set_operation().await;
        Ok(())
    }

    pub async fn remove_nacl_files(&self, paths: Vec<PathBuf>) -> Result<(), EditorError> {
        {
            let mut pending = self.pending.lock().await;
            for path in paths {
                let name = self.to_workspace_name(&path)?;
                pending.sets.remove(&name);
                pending.deletes.insert(name);
            }
        }
        self.run_aggregated_set_operation().await;
        Ok(())
    }

    /// Feed file-system events (from the workspace directory watcher)
    /// back through the edit queue: existing files become sets, missing
    /// ones become deletes
    pub async fn apply_fs_paths(&self, paths: Vec<PathBuf>) -> Result<(), EditorError> {
        let mut sets = Vec::new();
        let mut deletes = Vec::new();
        for path in paths {
            match std::fs::read_to_string(&path) {
                Ok(buffer) => sets.push((path, buffer)),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => deletes.push(path),
                Err(error) => return Err(error.into()),
            }
        }
        if !deletes.is_empty() {
            self.remove_nacl_files(deletes).await?;
        }
        if !sets.is_empty() {
            self.set_nacl_files(sets).await?;
        }
        Ok(())
    }

    /// Drain pending deletes then sets, re-entering while new edits keep
    /// arriving. Only one drain runs at a time; later callers join the
    /// in-flight one by waiting on the same lock.
    pub async fn run_aggregated_set_operation(&self) {
        let _guard = self.op_lock.lock().await;
        loop {
            let batch = {
                let mut pending = self.pending.lock().await;
                if pending.sets.is_empty() && pending.deletes.is_empty() {
                    break;
                }
                std::mem::take(&mut *pending)
            };

            let changes = {
                let mut workspace = self.workspace.lock().await;
                let mut changes = Vec::new();
                if !batch.deletes.is_empty() {
                    let names: Vec<&str> = batch.deletes.iter().map(|s| s.as_str()).collect();
                    changes.extend(workspace.remove_nacl_files(&names));
                }
                if !batch.sets.is_empty() {
                    let files = batch
                        .sets
                        .into_iter()
                        .map(|(name, buffer)| NaclFile::new(name, buffer))
                        .collect();
                    changes.extend(workspace.set_nacl_files(files));
                }
                changes
            };
            tracing::debug!(changes = changes.len(), "aggregated set operation applied");
            self.revalidate(&changes).await;
        }
    }

    /// Wait until every queued edit has been applied
    pub async fn await_all_updates(&self) {
        self.run_aggregated_set_operation().await;
    }

    // --- incremental validation ---

    /// Recompute validation errors only where the batch could have
    /// changed them: elements in changed files, elements whose previous
    /// errors pointed at changed elements, and referrers of removed
    /// elements.
    async fn revalidate(&self, changes: &[Change]) {
        if changes.is_empty() {
            return;
        }
        let mut workspace = self.workspace.lock().await;
        let universe = workspace.elements(true);

        let changed: BTreeSet<String> = changes.iter().map(|c| c.id.get_full_name()).collect();
        let mut scope = changed.clone();

        {
            let validation = self.validation.lock().await;
            for (full_name, errors) in validation.iter() {
                let related = errors
                    .iter()
                    .any(|error| changed.contains(&error.related_id().get_full_name()));
                if related {
                    scope.insert(full_name.clone());
                }
            }
        }

        // removed elements can orphan references elsewhere
        for change in changes.iter().filter(|c| c.action == ChangeAction::Remove) {
            for file in workspace.get_element_referenced_files(&change.id) {
                for id in workspace.elements_in_file(&file) {
                    scope.insert(id.get_full_name());
                }
            }
        }

        let to_validate: Vec<&Element> = scope
            .iter()
            .filter_map(|full_name| universe.get(full_name))
            .collect();
        let fresh = validate_elements(&to_validate, &universe);
        tracing::debug!(
            scope = scope.len(),
            errors = fresh.len(),
            "incremental validation"
        );

        let mut validation = self.validation.lock().await;
        for full_name in &scope {
            validation.remove(full_name);
        }
        for error in fresh {
            validation
                .entry(error.top_level_id().get_full_name())
                .or_default()
                .push(error);
        }
    }

    /// Run full validation once, seeding the incremental store
    pub async fn seed_validation(&self) {
        let mut workspace = self.workspace.lock().await;
        let errors = workspace.errors(true);
        let mut validation = self.validation.lock().await;
        validation.clear();
        for error in errors.validation {
            validation
                .entry(error.top_level_id().get_full_name())
                .or_default()
                .push(error);
        }
    }

    // --- queries ---

    /// Parse and merge errors straight from the workspace, validation
    /// errors from the incremental store
    pub async fn errors(&self) -> Errors {
        let mut errors = {
            let mut workspace = self.workspace.lock().await;
            workspace.errors(false)
        };
        let validation = self.validation.lock().await;
        errors.validation = validation.values().flatten().cloned().collect();
        errors
    }

    pub async fn elements(&self, include_hidden: bool) -> BTreeMap<String, Element> {
        let mut workspace = self.workspace.lock().await;
        workspace.elements(include_hidden)
    }

    pub async fn get_element(&self, id: &ElemID) -> Option<Element> {
        let mut workspace = self.workspace.lock().await;
        workspace.get_element(id)
    }

    /// Source ranges with filenames absolutized for the editor
    pub async fn get_source_ranges(&self, id: &ElemID) -> Vec<(PathBuf, SourceRange)> {
        let workspace = self.workspace.lock().await;
        workspace
            .get_source_ranges(id)
            .into_iter()
            .map(|range| (self.to_absolute(&range.filename), range))
            .collect()
    }

    pub async fn list_nacl_files(&self) -> Vec<PathBuf> {
        let workspace = self.workspace.lock().await;
        workspace
            .list_nacl_files()
            .into_iter()
            .map(|name| self.to_absolute(&name))
            .collect()
    }

    pub async fn flush(&self) -> Result<(), EditorError> {
        let mut workspace = self.workspace.lock().await;
        workspace.flush()?;
        Ok(())
    }
}
