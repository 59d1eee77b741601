//! # Workspace
//!
//! The state machine tying the file sources to the change API: cached
//! merged view, incremental re-merge per changed element, environment
//! lifecycle, and routing of detailed changes back into files.

use crate::config::{WorkspaceConfig, CACHE_DIR, CONFIG_DIR};
use crate::errors::{CollectedError, Errors, SourceFragment, WorkspaceError};
use crate::hidden::{apply_hidden_overlay, handle_hidden_changes};
use crate::multi_env::{layer_name, split_layer, Layer, MultiEnvSource, ENVS_PREFIX};
use crate::nacl_file_source::{NaclFile, NaclFileSource};
use crate::routing::{route_changes, RoutingMode};
use crate::state::{StateRecency, StateStore};
use nacl_common::DiskFileStore;
use nacl_merger::{merge_elements, merge_group, MergeError};
use nacl_model::{
    Change, ChangeAction, ChangePayload, DetailedChange, Element, ElemID, ElemIdType, Value,
};
use nacl_parser::{serialize, SourceMap, SourceRange};
use nacl_validator::validate_elements;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
struct MergedState {
    elements: BTreeMap<String, Element>,
    merge_errors: Vec<MergeError>,
}

pub struct Workspace {
    root: Option<PathBuf>,
    config: WorkspaceConfig,
    source: MultiEnvSource,
    states: BTreeMap<String, Arc<Mutex<StateStore>>>,
    merged: Option<MergedState>,
}

impl Clone for Workspace {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            config: self.config.clone(),
            source: self.source.clone(),
            // state stores are shared between a workspace and its clones
            states: self.states.clone(),
            merged: self.merged.clone(),
        }
    }
}

impl Workspace {
    /// In-memory workspace, used by tests and cloned editors
    pub fn new_in_memory(name: impl Into<String>) -> Self {
        let config = WorkspaceConfig::new(name);
        let source = MultiEnvSource::new(config.envs.iter().cloned());
        let states = config
            .envs
            .iter()
            .map(|env| (env.clone(), Arc::new(Mutex::new(StateStore::new()))))
            .collect();
        Self {
            root: None,
            config,
            source,
            states,
            merged: None,
        }
    }

    /// Open a workspace directory: `salto.config/`, `common/`, and one
    /// directory per environment under `envs/`
    pub fn load(root: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let root = root.into();
        let config = WorkspaceConfig::load(&root)?;

        let cache_root = root.join(CONFIG_DIR).join(CACHE_DIR);
        let mut source = MultiEnvSource::default();
        source.common = NaclFileSource::with_store(
            Box::new(DiskFileStore::load(root.join("common"), "nacl")?),
            Some(crate::cache::ParseCache::new(cache_root.join("common"))),
        );
        let mut states = BTreeMap::new();
        for env in &config.envs {
            let env_source = NaclFileSource::with_store(
                Box::new(DiskFileStore::load(
                    root.join(ENVS_PREFIX).join(env),
                    "nacl",
                )?),
                Some(crate::cache::ParseCache::new(cache_root.join(env))),
            );
            source.envs.insert(env.clone(), env_source);
            states.insert(env.clone(), Arc::new(Mutex::new(StateStore::new())));
        }

        Ok(Self {
            root: Some(root),
            config,
            source,
            states,
            merged: None,
        })
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn current_env(&self) -> &str {
        &self.config.current_env
    }

    pub fn envs(&self) -> &[String] {
        &self.config.envs
    }

    pub fn services(&self) -> &[String] {
        &self.config.services
    }

    pub fn add_service(&mut self, service: &str) -> Result<(), WorkspaceError> {
        if self.config.services.iter().any(|s| s == service) {
            return Err(WorkspaceError::ServiceDuplication(service.to_string()));
        }
        self.config.services.push(service.to_string());
        Ok(())
    }

    // --- environment lifecycle ---

    pub fn set_current_env(&mut self, env: &str) -> Result<(), WorkspaceError> {
        if !self.config.envs.iter().any(|e| e == env) {
            return Err(WorkspaceError::UnknownEnv(env.to_string()));
        }
        tracing::info!(env, "switching environment");
        self.config.current_env = env.to_string();
        self.merged = None;
        Ok(())
    }

    pub fn add_environment(&mut self, env: &str) -> Result<(), WorkspaceError> {
        if self.config.envs.iter().any(|e| e == env) {
            return Err(WorkspaceError::EnvDuplication(env.to_string()));
        }
        tracing::info!(env, "adding environment");
        self.config.envs.push(env.to_string());
        self.source
            .envs
            .insert(env.to_string(), NaclFileSource::new());
        self.states
            .insert(env.to_string(), Arc::new(Mutex::new(StateStore::new())));
        Ok(())
    }

    pub fn delete_environment(&mut self, env: &str) -> Result<(), WorkspaceError> {
        if !self.config.envs.iter().any(|e| e == env) {
            return Err(WorkspaceError::UnknownEnv(env.to_string()));
        }
        if env == self.config.current_env {
            return Err(WorkspaceError::DeleteCurrentEnv(env.to_string()));
        }
        tracing::info!(env, "deleting environment");
        self.config.envs.retain(|e| e != env);
        self.source.envs.remove(env);
        self.states.remove(env);
        if let Some(root) = &self.root {
            let dir = root.join(ENVS_PREFIX).join(env);
            if dir.exists() {
                std::fs::remove_dir_all(dir)?;
            }
        }
        Ok(())
    }

    pub fn rename_environment(&mut self, old: &str, new: &str) -> Result<(), WorkspaceError> {
        if !self.config.envs.iter().any(|e| e == old) {
            return Err(WorkspaceError::UnknownEnv(old.to_string()));
        }
        if self.config.envs.iter().any(|e| e == new) {
            return Err(WorkspaceError::EnvDuplication(new.to_string()));
        }
        tracing::info!(from = old, to = new, "renaming environment");
        if let Some(root) = &self.root {
            let old_dir = root.join(ENVS_PREFIX).join(old);
            if old_dir.exists() {
                std::fs::rename(old_dir, root.join(ENVS_PREFIX).join(new))?;
            }
        }
        if let Some(source) = self.source.envs.remove(old) {
            self.source.envs.insert(new.to_string(), source);
        }
        if let Some(state) = self.states.remove(old) {
            self.states.insert(new.to_string(), state);
        }
        for env in &mut self.config.envs {
            if env == old {
                *env = new.to_string();
            }
        }
        if self.config.current_env == old {
            self.config.current_env = new.to_string();
        }
        Ok(())
    }

    // --- merged view ---

    fn ensure_merged(&mut self) {
        if self.merged.is_some() {
            return;
        }
        let result = merge_elements(self.source.fragments_for(&self.config.current_env));
        tracing::debug!(elements = result.merged.len(), "full re-merge");
        self.merged = Some(MergedState {
            elements: result.merged,
            merge_errors: result.errors,
        });
    }

    /// Re-merge only the given top-level elements and splice the results
    /// into the cached merged map
    fn refresh_ids(&mut self, changed: &BTreeSet<String>) {
        if self.merged.is_none() || changed.is_empty() {
            return;
        }
        tracing::debug!(count = changed.len(), "incremental re-merge");

        let mut replacements: Vec<(String, Option<(Element, Vec<MergeError>)>)> = Vec::new();
        for full_name in changed {
            let Ok(id) = ElemID::from_full_name(full_name) else {
                continue;
            };
            let fragments = self.source.fragments_of(&self.config.current_env, &id);
            if fragments.is_empty() {
                replacements.push((full_name.clone(), None));
            } else {
                let (element, errors) = merge_group(fragments);
                replacements.push((full_name.clone(), Some((element, errors))));
            }
        }

        let merged = self.merged.as_mut().expect("checked above");
        merged
            .merge_errors
            .retain(|error| !changed.contains(&error.top_level_id().get_full_name()));
        for (full_name, replacement) in replacements {
            merged.elements.remove(&full_name);
            if let Some((element, errors)) = replacement {
                merged.elements.insert(full_name, element);
                merged.merge_errors.extend(errors);
            }
        }
    }

    /// The merged element map for the current environment
    pub fn elements(&mut self, include_hidden: bool) -> BTreeMap<String, Element> {
        self.ensure_merged();
        let mut elements = self.merged.as_ref().expect("just merged").elements.clone();
        if include_hidden {
            if let Some(state) = self.states.get(&self.config.current_env) {
                let state = state.lock().expect("state lock");
                apply_hidden_overlay(&mut elements, state.elements());
            }
        }
        elements
    }

    /// Merged view of an arbitrary environment; other envs bypass the
    /// cache
    pub fn elements_in(&mut self, env: &str, include_hidden: bool) -> BTreeMap<String, Element> {
        if env == self.config.current_env {
            return self.elements(include_hidden);
        }
        let result = merge_elements(self.source.fragments_for(env));
        let mut elements = result.merged;
        if include_hidden {
            if let Some(state) = self.states.get(env) {
                let state = state.lock().expect("state lock");
                apply_hidden_overlay(&mut elements, state.elements());
            }
        }
        elements
    }

    /// The full error state. Validation runs only when asked for; parse
    /// and merge errors come from the current caches.
    pub fn errors(&mut self, validate: bool) -> Errors {
        self.ensure_merged();
        let parse = self.source.parse_errors(&self.config.current_env);
        let merge = self
            .merged
            .as_ref()
            .expect("just merged")
            .merge_errors
            .clone();
        let validation = if validate {
            let universe = self.elements(true);
            let refs: Vec<&Element> = universe.values().collect();
            validate_elements(&refs, &universe)
        } else {
            Vec::new()
        };
        Errors {
            parse,
            merge,
            validation,
        }
    }

    // --- file operations ---

    fn split_files(&self, files: Vec<NaclFile>) -> BTreeMap<Layer, Vec<NaclFile>> {
        let mut by_layer: BTreeMap<Layer, Vec<NaclFile>> = BTreeMap::new();
        for file in files {
            let (layer, name) = split_layer(&file.name, &self.config.current_env);
            by_layer
                .entry(layer)
                .or_default()
                .push(NaclFile::new(name, file.buffer));
        }
        by_layer
    }

    fn layer_source_mut(&mut self, layer: &Layer) -> Option<&mut NaclFileSource> {
        match layer {
            Layer::Common => Some(&mut self.source.common),
            Layer::Env(env) => self.source.env_mut(env),
        }
    }

    /// Write buffers (names may carry `common/` or `envs/<env>/`
    /// prefixes; bare names go to the current env) and return the
    /// top-level element changes
    pub fn set_nacl_files(&mut self, files: Vec<NaclFile>) -> Vec<Change> {
        let mut changes = Vec::new();
        for (layer, batch) in self.split_files(files) {
            if let Some(source) = self.layer_source_mut(&layer) {
                changes.extend(source.set_nacl_files(batch));
            }
        }
        let changed: BTreeSet<String> = changes.iter().map(|c| c.id.get_full_name()).collect();
        self.refresh_ids(&changed);
        changes
    }

    pub fn remove_nacl_files(&mut self, names: &[&str]) -> Vec<Change> {
        let mut by_layer: BTreeMap<Layer, Vec<String>> = BTreeMap::new();
        for name in names {
            let (layer, file) = split_layer(name, &self.config.current_env);
            by_layer.entry(layer).or_default().push(file);
        }
        let mut changes = Vec::new();
        for (layer, batch) in by_layer {
            if let Some(source) = self.layer_source_mut(&layer) {
                let refs: Vec<&str> = batch.iter().map(|s| s.as_str()).collect();
                changes.extend(source.remove_nacl_files(&refs));
            }
        }
        let changed: BTreeSet<String> = changes.iter().map(|c| c.id.get_full_name()).collect();
        self.refresh_ids(&changed);
        changes
    }

    /// Apply detailed changes through the routing policy, rewriting the
    /// owning NaCl files
    pub fn update_nacl_files(
        &mut self,
        changes: Vec<DetailedChange>,
        mode: RoutingMode,
    ) -> Result<Vec<Change>, WorkspaceError> {
        let universe = self.elements(true);
        let changes = handle_hidden_changes(changes, &universe);
        // element payloads may come from the hidden-inclusive view; the
        // hidden parts must not reach the files
        let changes: Vec<DetailedChange> = changes
            .into_iter()
            .map(|mut change| {
                if let Some(ChangePayload::Element(element)) = change.after.take() {
                    change.after = Some(ChangePayload::Element(Box::new(
                        crate::hidden::strip_hidden_values(*element, &universe),
                    )));
                }
                change
            })
            .collect();
        let routed = route_changes(mode, changes, &self.source.common);

        let mut result = apply_detailed_changes(&mut self.source.common, routed.common);
        let current = self.config.current_env.clone();
        if let Some(env) = self.source.env_mut(&current) {
            result.extend(apply_detailed_changes(env, routed.env));
        }

        let changed: BTreeSet<String> = result.iter().map(|c| c.id.get_full_name()).collect();
        self.refresh_ids(&changed);
        Ok(result)
    }

    // --- promote / demote / copy ---

    /// Move env-specific elements into the common layer
    pub fn promote(&mut self, ids: &[ElemID]) -> Result<(), WorkspaceError> {
        let env_name = self.config.current_env.clone();
        for id in ids {
            let mut moved: Option<(Element, Vec<String>)> = None;
            if let Some(env) = self.source.env_mut(&env_name) {
                if let Some(element) = env.get_element(id) {
                    let files = env.get_element_nacl_files(id);
                    for file in &files {
                        remove_element_from_file(env, file, id);
                    }
                    moved = Some((element, files));
                }
            }
            if let Some((element, files)) = moved {
                let target = files
                    .first()
                    .cloned()
                    .unwrap_or_else(|| format!("{}.nacl", id.adapter()));
                append_element_to_file(&mut self.source.common, &target, element);
            }
        }
        self.invalidate_ids(ids);
        Ok(())
    }

    /// Move common elements into the current environment
    pub fn demote(&mut self, ids: &[ElemID]) -> Result<(), WorkspaceError> {
        let env_name = self.config.current_env.clone();
        for id in ids {
            let Some(element) = self.source.common.get_element(id) else {
                continue;
            };
            let files = self.source.common.get_element_nacl_files(id);
            for file in &files {
                remove_element_from_file(&mut self.source.common, file, id);
            }
            let target = files
                .first()
                .cloned()
                .unwrap_or_else(|| format!("{}.nacl", id.adapter()));
            if let Some(env) = self.source.env_mut(&env_name) {
                append_element_to_file(env, &target, element.clone());
            }
        }
        self.invalidate_ids(ids);
        Ok(())
    }

    /// Move everything out of common into the current environment
    pub fn demote_all(&mut self) -> Result<(), WorkspaceError> {
        let ids: Vec<ElemID> = self
            .source
            .common
            .element_names()
            .filter_map(|name| ElemID::from_full_name(name).ok())
            .collect();
        self.demote(&ids)
    }

    /// Copy current-env elements into other environments
    pub fn copy_to(&mut self, ids: &[ElemID], targets: &[String]) -> Result<(), WorkspaceError> {
        for target in targets {
            if !self.config.envs.iter().any(|e| e == target) {
                return Err(WorkspaceError::UnknownEnv(target.clone()));
            }
        }
        let env_name = self.config.current_env.clone();
        for id in ids {
            let Some((element, files)) = self.source.env(&env_name).and_then(|env| {
                env.get_element(id)
                    .map(|el| (el, env.get_element_nacl_files(id)))
            }) else {
                continue;
            };
            let target_file = files
                .first()
                .cloned()
                .unwrap_or_else(|| format!("{}.nacl", id.adapter()));
            for target in targets {
                if target == &env_name {
                    continue;
                }
                if let Some(env) = self.source.env_mut(target) {
                    remove_element_from_file(env, &target_file, id);
                    append_element_to_file(env, &target_file, element.clone());
                }
            }
        }
        Ok(())
    }

    fn invalidate_ids(&mut self, ids: &[ElemID]) {
        let changed: BTreeSet<String> = ids.iter().map(|id| id.get_full_name()).collect();
        self.refresh_ids(&changed);
    }

    // --- queries ---

    pub fn get_element(&mut self, id: &ElemID) -> Option<Element> {
        self.ensure_merged();
        let (top, _) = id.create_top_level_parent_id();
        self.merged
            .as_ref()
            .expect("just merged")
            .elements
            .get(&top.get_full_name())
            .cloned()
    }

    /// Resolve a possibly nested ID to its value in the merged view
    pub fn get_value(&mut self, id: &ElemID) -> Option<Value> {
        let (top, path) = id.create_top_level_parent_id();
        let element = self.get_element(id)?;
        match (&element, top.id_type()) {
            (Element::Instance(instance), _) => {
                if path.is_empty() {
                    return None;
                }
                instance
                    .value
                    .get(&path[0])
                    .and_then(|value| value.get_nested(&path[1..]))
                    .cloned()
            }
            (Element::Variable(variable), _) => Some(variable.value.clone()),
            (Element::Object(object), _) if id.id_type() == ElemIdType::Attr => object
                .annotations
                .get(&path[0])
                .and_then(|value| value.get_nested(&path[1..]))
                .cloned(),
            _ => None,
        }
    }

    pub fn get_source_map(&self, name: &str) -> Option<SourceMap> {
        let (layer, file) = split_layer(name, &self.config.current_env);
        match layer {
            Layer::Common => self.source.common.get_source_map(&file).cloned(),
            Layer::Env(env) => self
                .source
                .env(&env)
                .and_then(|s| s.get_source_map(&file).cloned()),
        }
    }

    /// Source ranges across both layers, filenames qualified with their
    /// layer prefix
    pub fn get_source_ranges(&self, id: &ElemID) -> Vec<SourceRange> {
        let mut ranges: Vec<SourceRange> = self
            .source
            .common
            .get_source_ranges(id)
            .into_iter()
            .map(|mut range| {
                range.filename = layer_name(&Layer::Common, &range.filename);
                range
            })
            .collect();
        if let Some(env) = self.source.env(&self.config.current_env) {
            let layer = Layer::Env(self.config.current_env.clone());
            ranges.extend(env.get_source_ranges(id).into_iter().map(|mut range| {
                range.filename = layer_name(&layer, &range.filename);
                range
            }));
        }
        ranges
    }

    pub fn list_nacl_files(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .source
            .common
            .list_nacl_files()
            .into_iter()
            .map(|name| layer_name(&Layer::Common, &name))
            .collect();
        if let Some(env) = self.source.env(&self.config.current_env) {
            let layer = Layer::Env(self.config.current_env.clone());
            names.extend(
                env.list_nacl_files()
                    .into_iter()
                    .map(|name| layer_name(&layer, &name)),
            );
        }
        names
    }

    pub fn get_total_size(&self) -> usize {
        self.source.common.get_total_size()
            + self
                .source
                .env(&self.config.current_env)
                .map(|env| env.get_total_size())
                .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.source.common.is_empty()
            && self
                .source
                .env(&self.config.current_env)
                .map(|env| env.is_empty())
                .unwrap_or(true)
    }

    pub fn has_element(&self, id: &ElemID) -> bool {
        self.source.common.has_element(id)
            || self
                .source
                .env(&self.config.current_env)
                .map(|env| env.has_element(id))
                .unwrap_or(false)
    }

    /// Files (layer-qualified) whose parse references the element
    pub fn get_element_referenced_files(&self, id: &ElemID) -> Vec<String> {
        let mut files: Vec<String> = self
            .source
            .common
            .get_element_referenced_files(id)
            .into_iter()
            .map(|name| layer_name(&Layer::Common, &name))
            .collect();
        if let Some(env) = self.source.env(&self.config.current_env) {
            let layer = Layer::Env(self.config.current_env.clone());
            files.extend(
                env.get_element_referenced_files(id)
                    .into_iter()
                    .map(|name| layer_name(&layer, &name)),
            );
        }
        files
    }

    /// Top-level element IDs defined in a (layer-qualified) file
    pub fn elements_in_file(&self, name: &str) -> Vec<ElemID> {
        let (layer, file) = split_layer(name, &self.config.current_env);
        let source = match &layer {
            Layer::Common => Some(&self.source.common),
            Layer::Env(env) => self.source.env(env),
        };
        source
            .and_then(|s| s.get_parsed_nacl_file(&file))
            .map(|parsed| {
                parsed
                    .elements
                    .iter()
                    .map(|e| e.elem_id().clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    // --- state ---

    pub fn state(&self, env: &str) -> Option<Arc<Mutex<StateStore>>> {
        self.states.get(env).cloned()
    }

    pub fn set_state_elements(&mut self, service: &str, elements: Vec<Element>) {
        if let Some(state) = self.states.get(&self.config.current_env) {
            state.lock().expect("state lock").set_elements(service, elements);
        }
    }

    pub fn get_state_recency(&self, service: &str) -> StateRecency {
        let threshold = chrono::Duration::days(self.config.staleness_threshold_days);
        self.states
            .get(&self.config.current_env)
            .map(|state| state.lock().expect("state lock").recency(service, threshold))
            .unwrap_or(StateRecency::Nonexistent)
    }

    // --- lifecycle ---

    pub fn clear(&mut self) {
        self.source.common.clear();
        for env in self.source.envs.values_mut() {
            env.clear();
        }
        for state in self.states.values() {
            state.lock().expect("state lock").clear();
        }
        self.merged = None;
    }

    pub fn flush(&mut self) -> Result<(), WorkspaceError> {
        self.source.common.flush()?;
        for env in self.source.envs.values_mut() {
            env.flush()?;
        }
        if let Some(root) = &self.root {
            self.config.save(root)?;
        }
        Ok(())
    }

    /// Attach the source fragments an error points at, for human-facing
    /// error output
    pub fn transform_to_workspace_error(&self, error: &CollectedError) -> crate::errors::EnrichedError {
        let ranges = match error {
            CollectedError::Parse(parse_error) => vec![parse_error.subject.clone()],
            other => other
                .top_level_id()
                .map(|id| self.get_source_ranges(&id))
                .unwrap_or_default(),
        };
        let source_fragments = ranges
            .into_iter()
            .filter_map(|range| self.fragment_for_range(range))
            .collect();
        crate::errors::EnrichedError {
            error: error.clone(),
            source_fragments,
        }
    }

    fn fragment_for_range(&self, range: SourceRange) -> Option<SourceFragment> {
        let (layer, file) = split_layer(&range.filename, &self.config.current_env);
        let buffer = match &layer {
            Layer::Common => self.source.common.get_nacl_file(&file),
            Layer::Env(env) => self.source.env(env).and_then(|s| s.get_nacl_file(&file)),
        }
        // unprefixed range filenames come straight from a layer source
        .or_else(|| {
            self.source
                .common
                .get_nacl_file(&range.filename)
                .or_else(|| {
                    self.source
                        .env(&self.config.current_env)
                        .and_then(|s| s.get_nacl_file(&range.filename))
                })
        })?;
        let fragment = buffer
            .get(range.start.byte..range.end.byte)
            .unwrap_or_default()
            .to_string();
        Some(SourceFragment {
            source_range: range,
            fragment,
        })
    }
}

// --- detailed-change application ---

/// Apply routed detailed changes to one layer's files by rewriting the
/// owning buffers through the serializer
fn apply_detailed_changes(source: &mut NaclFileSource, changes: Vec<DetailedChange>) -> Vec<Change> {
    let mut result = Vec::new();
    for change in changes {
        let top = change.top_level_id();
        let files = source.get_element_nacl_files(&top);

        if change.id.is_top_level() && change.action == ChangeAction::Remove {
            for file in &files {
                result.extend(remove_element_from_file(source, file, &top));
            }
            continue;
        }

        if files.is_empty() {
            // a new element: only a top-level add with an element payload
            // can materialize it
            let Some(ChangePayload::Element(element)) = &change.after else {
                continue;
            };
            let target = change
                .path
                .as_ref()
                .map(|path| format!("{}.nacl", path.join("/")))
                .unwrap_or_else(|| format!("{}.nacl", top.adapter()));
            result.extend(append_element_to_file(source, &target, (**element).clone()));
            continue;
        }

        // nested edits land in the fragment that defines the changed
        // path, falling back to the element's first file
        let target = files
            .iter()
            .find(|file| {
                source
                    .get_source_map(file)
                    .and_then(|map| map.get(&change.id.get_full_name()))
                    .is_some()
            })
            .unwrap_or(&files[0])
            .clone();

        let Some(parsed) = source.get_parsed_nacl_file(&target) else {
            continue;
        };
        let mut elements = parsed.elements.clone();
        let full_name = top.get_full_name();
        if let Some(element) = elements
            .iter_mut()
            .find(|e| e.elem_id().get_full_name() == full_name)
        {
            apply_change_to_element(element, &change);
        }
        let refs: Vec<&Element> = elements.iter().collect();
        let buffer = serialize(&refs);
        result.extend(source.set_nacl_files(vec![NaclFile::new(target.clone(), buffer)]));

        // a whole-element modify collapses the other fragments
        if change.id.is_top_level() {
            let others: Vec<String> = files.iter().filter(|f| **f != target).cloned().collect();
            for file in &others {
                result.extend(remove_element_from_file(source, file, &top));
            }
        }
    }
    result
}

fn apply_change_to_element(element: &mut Element, change: &DetailedChange) {
    let (_, path) = change.id.create_top_level_parent_id();
    if path.is_empty() {
        if let Some(ChangePayload::Element(after)) = &change.after {
            *element = (**after).clone();
        }
        return;
    }
    let value = change.after.as_ref().and_then(|payload| payload.as_value());

    match element {
        Element::Instance(instance) => match (change.action, value) {
            (ChangeAction::Remove, _) => remove_nested(&mut instance.value, &path),
            (_, Some(value)) => set_nested(&mut instance.value, &path, value.clone()),
            _ => {}
        },
        Element::Object(object) if change.id.id_type() == ElemIdType::Attr => {
            match (change.action, value) {
                (ChangeAction::Remove, _) => remove_nested(&mut object.annotations, &path),
                (_, Some(value)) => set_nested(&mut object.annotations, &path, value.clone()),
                _ => {}
            }
        }
        Element::Object(object) if change.id.id_type() == ElemIdType::Field => {
            // edits below a field touch its annotations
            let Some(field) = object.fields.get_mut(&path[0]) else {
                return;
            };
            match (change.action, value) {
                (ChangeAction::Remove, _) if path.len() == 1 => {
                    object.fields.remove(&path[0]);
                }
                (ChangeAction::Remove, _) => remove_nested(&mut field.annotations, &path[1..]),
                (_, Some(value)) if path.len() > 1 => {
                    set_nested(&mut field.annotations, &path[1..], value.clone())
                }
                _ => {}
            }
        }
        Element::Variable(variable) => {
            if let Some(value) = value {
                variable.value = value.clone();
            }
        }
        _ => {}
    }
}

fn set_nested(map: &mut BTreeMap<String, Value>, path: &[String], value: Value) {
    if path.len() == 1 {
        map.insert(path[0].clone(), value);
        return;
    }
    let entry = map
        .entry(path[0].clone())
        .or_insert_with(|| Value::Map(BTreeMap::new()));
    if let Value::Map(inner) = entry {
        set_nested(inner, &path[1..], value);
    }
}

fn remove_nested(map: &mut BTreeMap<String, Value>, path: &[String]) {
    if path.len() == 1 {
        map.remove(&path[0]);
        return;
    }
    if let Some(Value::Map(inner)) = map.get_mut(&path[0]) {
        remove_nested(inner, &path[1..]);
    }
}

fn remove_element_from_file(source: &mut NaclFileSource, file: &str, id: &ElemID) -> Vec<Change> {
    let Some(parsed) = source.get_parsed_nacl_file(file) else {
        return Vec::new();
    };
    let full_name = id.get_full_name();
    let elements: Vec<Element> = parsed
        .elements
        .iter()
        .filter(|e| e.elem_id().get_full_name() != full_name)
        .cloned()
        .collect();
    if elements.is_empty() {
        source.remove_nacl_files(&[file])
    } else {
        let refs: Vec<&Element> = elements.iter().collect();
        let buffer = serialize(&refs);
        source.set_nacl_files(vec![NaclFile::new(file, buffer)])
    }
}

fn append_element_to_file(source: &mut NaclFileSource, file: &str, element: Element) -> Vec<Change> {
    let mut elements: Vec<Element> = source
        .get_parsed_nacl_file(file)
        .map(|parsed| {
            parsed
                .elements
                .iter()
                .filter(|e| e.elem_id() != element.elem_id())
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    elements.push(element);
    let refs: Vec<&Element> = elements.iter().collect();
    let buffer = serialize(&refs);
    source.set_nacl_files(vec![NaclFile::new(file, buffer)])
}
