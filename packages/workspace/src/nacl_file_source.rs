//! # NaCl file source
//!
//! Owns one directory's worth of NaCl files for a single layer (common
//! or one environment): buffers, per-file parse results, and the two
//! indices that make incremental updates cheap — element → files that
//! define it, and element → files that reference it.

use crate::cache::{content_hash, ParseCache};
use nacl_common::{FileStore, MemoryFileStore};
use nacl_merger::{merge_group, Fragment};
use nacl_model::{Change, Element, ElemID};
use nacl_parser::{parse, ParseError, ParseResult, SourceMap, SourceRange};
use std::collections::{BTreeMap, BTreeSet};

/// A named NaCl buffer handed to `set_nacl_files`
#[derive(Debug, Clone, PartialEq)]
pub struct NaclFile {
    pub name: String,
    pub buffer: String,
}

impl NaclFile {
    pub fn new(name: impl Into<String>, buffer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffer: buffer.into(),
        }
    }
}

#[derive(Clone)]
pub struct NaclFileSource {
    store: Box<dyn FileStore>,
    parsed: BTreeMap<String, ParseResult>,
    /// element full name → files containing fragments of it
    element_files: BTreeMap<String, BTreeSet<String>>,
    /// element full name → files whose parse referenced it
    referenced_files: BTreeMap<String, BTreeSet<String>>,
    cache: Option<ParseCache>,
    /// files parsed since the last flush, pending a cache write
    dirty: BTreeSet<String>,
}

impl Default for NaclFileSource {
    fn default() -> Self {
        Self::new()
    }
}

impl NaclFileSource {
    pub fn new() -> Self {
        Self {
            store: Box::new(MemoryFileStore::new()),
            parsed: BTreeMap::new(),
            element_files: BTreeMap::new(),
            referenced_files: BTreeMap::new(),
            cache: None,
            dirty: BTreeSet::new(),
        }
    }

    /// Build a source over existing buffers, going through the parse
    /// cache where it hits
    pub fn with_store(store: Box<dyn FileStore>, cache: Option<ParseCache>) -> Self {
        let mut source = Self {
            store,
            parsed: BTreeMap::new(),
            element_files: BTreeMap::new(),
            referenced_files: BTreeMap::new(),
            cache,
            dirty: BTreeSet::new(),
        };
        for name in source.store.list() {
            let buffer = source.store.get(&name).unwrap_or_default().to_string();
            let result = source.parse_buffer(&name, &buffer);
            source.index_file(&name, &result);
            source.parsed.insert(name, result);
        }
        source
    }

    fn parse_buffer(&mut self, name: &str, buffer: &str) -> ParseResult {
        let hash = content_hash(buffer);
        if let Some(cache) = &self.cache {
            if let Some(result) = cache.get(name, &hash) {
                return result;
            }
        }
        self.dirty.insert(name.to_string());
        parse(name, buffer)
    }

    /// Write or overwrite buffers and return the resulting top-level
    /// element changes
    pub fn set_nacl_files(&mut self, files: Vec<NaclFile>) -> Vec<Change> {
        let mut affected: BTreeSet<String> = BTreeSet::new();
        let mut new_results: Vec<(String, ParseResult)> = Vec::new();

        for file in &files {
            if let Some(old) = self.parsed.get(&file.name) {
                affected.extend(old.elements.iter().map(|e| e.elem_id().get_full_name()));
            }
            let result = self.parse_buffer(&file.name, &file.buffer);
            affected.extend(result.elements.iter().map(|e| e.elem_id().get_full_name()));
            new_results.push((file.name.clone(), result));
        }

        let before = self.snapshot(&affected);
        for (file, (name, result)) in files.into_iter().zip(new_results) {
            self.unindex_file(&name);
            self.store.set(&name, file.buffer);
            self.index_file(&name, &result);
            self.parsed.insert(name, result);
        }
        self.changes_since(before, &affected)
    }

    /// Remove buffers and return the resulting element changes
    pub fn remove_nacl_files(&mut self, names: &[&str]) -> Vec<Change> {
        let mut affected: BTreeSet<String> = BTreeSet::new();
        for name in names {
            if let Some(old) = self.parsed.get(*name) {
                affected.extend(old.elements.iter().map(|e| e.elem_id().get_full_name()));
            }
        }

        let before = self.snapshot(&affected);
        for name in names {
            self.unindex_file(name);
            self.parsed.remove(*name);
            self.store.remove(name);
            self.dirty.remove(*name);
            if let Some(cache) = &self.cache {
                cache.remove(name);
            }
        }
        self.changes_since(before, &affected)
    }

    fn snapshot(&self, full_names: &BTreeSet<String>) -> BTreeMap<String, Option<Element>> {
        full_names
            .iter()
            .map(|name| (name.clone(), self.get_element_by_name(name)))
            .collect()
    }

    fn changes_since(
        &self,
        before: BTreeMap<String, Option<Element>>,
        affected: &BTreeSet<String>,
    ) -> Vec<Change> {
        let mut changes = Vec::new();
        for full_name in affected {
            let old = before.get(full_name).cloned().flatten();
            let new = self.get_element_by_name(full_name);
            match (old, new) {
                (None, Some(element)) => changes.push(Change::add(element)),
                (Some(element), None) => changes.push(Change::remove(element)),
                (Some(old), Some(new)) if old != new => changes.push(Change::modify(old, new)),
                _ => {}
            }
        }
        changes
    }

    fn index_file(&mut self, name: &str, result: &ParseResult) {
        for element in &result.elements {
            self.element_files
                .entry(element.elem_id().get_full_name())
                .or_default()
                .insert(name.to_string());
        }
        for id in &result.referenced {
            self.referenced_files
                .entry(id.get_full_name())
                .or_default()
                .insert(name.to_string());
        }
    }

    /// Drop every index entry contributed by `name`; stale entries must
    /// go before the new parse is indexed
    fn unindex_file(&mut self, name: &str) {
        let Some(old) = self.parsed.get(name) else {
            return;
        };
        let element_names: Vec<String> = old
            .elements
            .iter()
            .map(|e| e.elem_id().get_full_name())
            .collect();
        let referenced_names: Vec<String> =
            old.referenced.iter().map(|id| id.get_full_name()).collect();

        for full_name in element_names {
            if let Some(files) = self.element_files.get_mut(&full_name) {
                files.remove(name);
                if files.is_empty() {
                    self.element_files.remove(&full_name);
                }
            }
        }
        for full_name in referenced_names {
            if let Some(files) = self.referenced_files.get_mut(&full_name) {
                files.remove(name);
                if files.is_empty() {
                    self.referenced_files.remove(&full_name);
                }
            }
        }
    }

    // --- queries ---

    pub fn get_parsed_nacl_file(&self, name: &str) -> Option<&ParseResult> {
        self.parsed.get(name)
    }

    pub fn get_nacl_file(&self, name: &str) -> Option<&str> {
        self.store.get(name)
    }

    pub fn get_source_map(&self, name: &str) -> Option<&SourceMap> {
        self.parsed.get(name).map(|result| &result.source_map)
    }

    /// All ranges the element (or a part nested under it) was parsed from
    pub fn get_source_ranges(&self, id: &ElemID) -> Vec<SourceRange> {
        let full_name = id.get_full_name();
        let (top, _) = id.create_top_level_parent_id();
        let mut ranges = Vec::new();
        if let Some(files) = self.element_files.get(&top.get_full_name()) {
            for file in files {
                if let Some(result) = self.parsed.get(file) {
                    if let Some(found) = result.source_map.get(&full_name) {
                        ranges.extend(found.iter().cloned());
                    }
                }
            }
        }
        ranges
    }

    /// Files containing fragments of the element
    pub fn get_element_nacl_files(&self, id: &ElemID) -> Vec<String> {
        let (top, _) = id.create_top_level_parent_id();
        self.element_files
            .get(&top.get_full_name())
            .map(|files| files.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Files whose parse referenced the element
    pub fn get_element_referenced_files(&self, id: &ElemID) -> Vec<String> {
        let (top, _) = id.create_top_level_parent_id();
        self.referenced_files
            .get(&top.get_full_name())
            .map(|files| files.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Files defining the elements that this element references
    pub fn get_element_references_to_files(&self, id: &ElemID) -> Vec<String> {
        let mut files = BTreeSet::new();
        for file in self.get_element_nacl_files(id) {
            if let Some(result) = self.parsed.get(&file) {
                for target in &result.referenced {
                    if let Some(target_files) = self.element_files.get(&target.get_full_name()) {
                        files.extend(target_files.iter().cloned());
                    }
                }
            }
        }
        files.into_iter().collect()
    }

    pub fn list_nacl_files(&self) -> Vec<String> {
        self.store.list()
    }

    pub fn get_total_size(&self) -> usize {
        self.store.total_size()
    }

    pub fn is_empty(&self) -> bool {
        self.parsed.is_empty()
    }

    /// All element full names with at least one fragment here
    pub fn element_names(&self) -> impl Iterator<Item = &String> {
        self.element_files.keys()
    }

    pub fn has_element(&self, id: &ElemID) -> bool {
        self.element_files.contains_key(&id.get_full_name())
    }

    /// The element as merged from this source's fragments alone
    pub fn get_element(&self, id: &ElemID) -> Option<Element> {
        self.get_element_by_name(&id.get_full_name())
    }

    fn get_element_by_name(&self, full_name: &str) -> Option<Element> {
        let fragments = self.fragments_of_name(full_name);
        if fragments.is_empty() {
            return None;
        }
        Some(merge_group(fragments).0)
    }

    /// Every fragment in this source, for the cross-layer merge
    pub fn fragments(&self) -> Vec<Fragment> {
        self.parsed
            .iter()
            .flat_map(|(file, result)| {
                result
                    .elements
                    .iter()
                    .map(|element| Fragment::new(element.clone(), file.clone()))
            })
            .collect()
    }

    pub fn fragments_of(&self, id: &ElemID) -> Vec<Fragment> {
        self.fragments_of_name(&id.get_full_name())
    }

    fn fragments_of_name(&self, full_name: &str) -> Vec<Fragment> {
        let Some(files) = self.element_files.get(full_name) else {
            return Vec::new();
        };
        let mut fragments = Vec::new();
        for file in files {
            if let Some(result) = self.parsed.get(file) {
                for element in &result.elements {
                    if element.elem_id().get_full_name() == full_name {
                        fragments.push(Fragment::new(element.clone(), file.clone()));
                    }
                }
            }
        }
        fragments
    }

    pub fn parse_errors(&self) -> Vec<ParseError> {
        self.parsed
            .values()
            .flat_map(|result| result.errors.iter().cloned())
            .collect()
    }

    // --- lifecycle ---

    pub fn rename_file(&mut self, old_name: &str, new_name: &str) {
        let Some(buffer) = self.store.get(old_name).map(|s| s.to_string()) else {
            return;
        };
        self.remove_nacl_files(&[old_name]);
        self.set_nacl_files(vec![NaclFile::new(new_name, buffer)]);
    }

    pub fn clear(&mut self) {
        for name in self.store.list() {
            if let Some(cache) = &self.cache {
                cache.remove(&name);
            }
        }
        self.store.clear();
        self.parsed.clear();
        self.element_files.clear();
        self.referenced_files.clear();
        self.dirty.clear();
    }

    /// Persist buffers and pending parse-cache records
    pub fn flush(&mut self) -> std::io::Result<()> {
        if let Some(cache) = &self.cache {
            for name in &self.dirty {
                if let (Some(buffer), Some(result)) = (self.store.get(name), self.parsed.get(name))
                {
                    cache.put(name, &content_hash(buffer), result)?;
                }
            }
        }
        self.dirty.clear();
        self.store.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nacl_model::ChangeAction;

    fn account(fields: &str) -> String {
        format!("type salesforce.Account {{ {} }}", fields)
    }

    #[test]
    fn test_add_edit_remove_lifecycle() {
        let mut source = NaclFileSource::new();

        let changes = source.set_nacl_files(vec![NaclFile::new("a.nacl", account("string Name {}"))]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Add);
        assert_eq!(changes[0].id.get_full_name(), "salesforce.Account");

        let changes =
            source.set_nacl_files(vec![NaclFile::new("a.nacl", account("string Email {}"))]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Modify);

        let changes = source.remove_nacl_files(&["a.nacl"]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Remove);
        assert!(source.is_empty());
    }

    #[test]
    fn test_unchanged_reparse_reports_no_changes() {
        let mut source = NaclFileSource::new();
        source.set_nacl_files(vec![NaclFile::new("a.nacl", account("string Name {}"))]);
        let changes = source.set_nacl_files(vec![NaclFile::new(
            "a.nacl",
            "type   salesforce.Account  { string Name {} }",
        )]);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_fragment_removal_is_modify_when_other_files_remain() {
        let mut source = NaclFileSource::new();
        source.set_nacl_files(vec![
            NaclFile::new("a.nacl", account("string Name {}")),
            NaclFile::new("b.nacl", account("string Email {}")),
        ]);
        // removing one file's fragment modifies, not removes
        let changes = source.remove_nacl_files(&["b.nacl"]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Modify);
        assert!(source.has_element(&ElemID::new("salesforce", "Account")));
    }

    #[test]
    fn test_reverse_reference_index() {
        let mut source = NaclFileSource::new();
        source.set_nacl_files(vec![
            NaclFile::new("a.nacl", account("string Name {}")),
            NaclFile::new(
                "b.nacl",
                "salesforce.Account prod { owner = salesforce.User.instance.admin }",
            ),
        ]);
        let user = ElemID::from_full_name("salesforce.User.instance.admin").unwrap();
        assert_eq!(source.get_element_referenced_files(&user), vec!["b.nacl"]);

        // stale entries disappear when the file stops referencing
        source.set_nacl_files(vec![NaclFile::new(
            "b.nacl",
            "salesforce.Account prod { name = \"x\" }",
        )]);
        assert!(source.get_element_referenced_files(&user).is_empty());
    }

    #[test]
    fn test_references_to_files() {
        let mut source = NaclFileSource::new();
        source.set_nacl_files(vec![
            NaclFile::new("types.nacl", "type salesforce.User { string name {} }\ntype salesforce.User2 {}"),
            NaclFile::new(
                "inst.nacl",
                "salesforce.User admin { name = \"a\" }",
            ),
            NaclFile::new(
                "refs.nacl",
                "salesforce.User2 x { boss = salesforce.User.instance.admin }",
            ),
        ]);
        let x = ElemID::from_full_name("salesforce.User2.instance.x").unwrap();
        // x references the admin instance and (through its type) User2
        let files = source.get_element_references_to_files(&x);
        assert_eq!(
            files,
            vec!["inst.nacl".to_string(), "types.nacl".to_string()]
        );
    }

    #[test]
    fn test_source_ranges_cover_fragments() {
        let mut source = NaclFileSource::new();
        source.set_nacl_files(vec![
            NaclFile::new("a.nacl", account("string Name {}")),
            NaclFile::new("b.nacl", account("string Email {}")),
        ]);
        let ranges = source.get_source_ranges(&ElemID::new("salesforce", "Account"));
        assert_eq!(ranges.len(), 2);
        let field = ElemID::from_full_name("salesforce.Account.field.Email").unwrap();
        let ranges = source.get_source_ranges(&field);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].filename, "b.nacl");
    }

    #[test]
    fn test_parse_failure_is_isolated_per_file() {
        let mut source = NaclFileSource::new();
        source.set_nacl_files(vec![
            NaclFile::new("good.nacl", account("string Name {}")),
            NaclFile::new("bad.nacl", "type salesforce.Broken { oops"),
        ]);
        assert!(!source.parse_errors().is_empty());
        assert!(source.has_element(&ElemID::new("salesforce", "Account")));
    }

    #[test]
    fn test_flush_and_reload_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let files_dir = dir.path().join("files");
        let cache_dir = dir.path().join("cache");

        let mut source = NaclFileSource::with_store(
            Box::new(nacl_common::DiskFileStore::load(&files_dir, "nacl").unwrap()),
            Some(ParseCache::new(&cache_dir)),
        );
        source.set_nacl_files(vec![NaclFile::new("a.nacl", account("string Name {}"))]);
        source.flush().unwrap();

        // reload: the cache record must round-trip to the same parse
        let reloaded = NaclFileSource::with_store(
            Box::new(nacl_common::DiskFileStore::load(&files_dir, "nacl").unwrap()),
            Some(ParseCache::new(&cache_dir)),
        );
        assert_eq!(
            reloaded.get_parsed_nacl_file("a.nacl"),
            source.get_parsed_nacl_file("a.nacl")
        );
        // loaded via cache, so nothing is pending a re-flush
        assert!(reloaded.dirty.is_empty());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut source = NaclFileSource::new();
        source.set_nacl_files(vec![NaclFile::new("a.nacl", account("string Name {}"))]);
        let mut copy = source.clone();
        copy.remove_nacl_files(&["a.nacl"]);
        assert!(source.has_element(&ElemID::new("salesforce", "Account")));
        assert!(copy.is_empty());
    }
}
