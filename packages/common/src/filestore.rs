use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Text file buffers backing a NaCl source.
///
/// Names are relative, slash-separated paths. The trait keeps the
/// workspace testable purely in memory while production runs on disk.
pub trait FileStore: Send {
    fn get(&self, name: &str) -> Option<&str>;

    fn set(&mut self, name: &str, content: String);

    /// Remove a file; returns whether it existed
    fn remove(&mut self, name: &str) -> bool;

    fn list(&self) -> Vec<String>;

    /// Total size of all buffers in bytes
    fn total_size(&self) -> usize;

    /// Move every file under `old_prefix/` to `new_prefix/`
    fn rename_prefix(&mut self, old_prefix: &str, new_prefix: &str);

    /// Persist pending writes (no-op for memory stores)
    fn flush(&mut self) -> std::io::Result<()>;

    fn clear(&mut self);

    fn clone_box(&self) -> Box<dyn FileStore>;
}

/// In-memory store, used by tests and cloned workspaces
#[derive(Debug, Clone, Default)]
pub struct MemoryFileStore {
    files: BTreeMap<String, String>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileStore for MemoryFileStore {
    fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(|s| s.as_str())
    }

    fn set(&mut self, name: &str, content: String) {
        self.files.insert(name.to_string(), content);
    }

    fn remove(&mut self, name: &str) -> bool {
        self.files.remove(name).is_some()
    }

    fn list(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    fn total_size(&self) -> usize {
        self.files.values().map(|s| s.len()).sum()
    }

    fn rename_prefix(&mut self, old_prefix: &str, new_prefix: &str) {
        let old = std::mem::take(&mut self.files);
        let prefix = format!("{}/", old_prefix);
        self.files = old
            .into_iter()
            .map(|(name, content)| match name.strip_prefix(&prefix) {
                Some(rest) => (format!("{}/{}", new_prefix, rest), content),
                None => (name, content),
            })
            .collect();
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn clear(&mut self) {
        self.files.clear();
    }

    fn clone_box(&self) -> Box<dyn FileStore> {
        Box::new(self.clone())
    }
}

/// Disk-backed store rooted at a directory. Reads are served from memory
/// after the initial load; writes are buffered until `flush`.
#[derive(Debug, Clone)]
pub struct DiskFileStore {
    root: PathBuf,
    files: BTreeMap<String, String>,
    dirty: BTreeSet<String>,
    deleted: BTreeSet<String>,
}

impl DiskFileStore {
    /// Load every file with the given extension under `root`
    pub fn load(root: impl Into<PathBuf>, extension: &str) -> std::io::Result<Self> {
        let root = root.into();
        let mut files = BTreeMap::new();
        if root.exists() {
            for entry in walkdir::WalkDir::new(&root)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                    continue;
                }
                let name = relative_name(&root, path);
                files.insert(name, std::fs::read_to_string(path)?);
            }
        }
        Ok(Self {
            root,
            files,
            dirty: BTreeSet::new(),
            deleted: BTreeSet::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl FileStore for DiskFileStore {
    fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(|s| s.as_str())
    }

    fn set(&mut self, name: &str, content: String) {
        self.deleted.remove(name);
        self.dirty.insert(name.to_string());
        self.files.insert(name.to_string(), content);
    }

    fn remove(&mut self, name: &str) -> bool {
        self.dirty.remove(name);
        if self.files.remove(name).is_some() {
            self.deleted.insert(name.to_string());
            true
        } else {
            false
        }
    }

    fn list(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    fn total_size(&self) -> usize {
        self.files.values().map(|s| s.len()).sum()
    }

    fn rename_prefix(&mut self, old_prefix: &str, new_prefix: &str) {
        let names: Vec<String> = self
            .files
            .keys()
            .filter(|name| name.starts_with(&format!("{}/", old_prefix)))
            .cloned()
            .collect();
        for name in names {
            let content = self.files.remove(&name).unwrap();
            self.deleted.insert(name.clone());
            self.dirty.remove(&name);
            let renamed = format!(
                "{}/{}",
                new_prefix,
                name.strip_prefix(&format!("{}/", old_prefix)).unwrap()
            );
            self.dirty.insert(renamed.clone());
            self.files.insert(renamed, content);
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        for name in std::mem::take(&mut self.deleted) {
            let path = self.root.join(&name);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        for name in std::mem::take(&mut self.dirty) {
            let path = self.root.join(&name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &self.files[&name])?;
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.deleted.extend(self.files.keys().cloned());
        self.dirty.clear();
        self.files.clear();
    }

    fn clone_box(&self) -> Box<dyn FileStore> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn FileStore> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_basics() {
        let mut store = MemoryFileStore::new();
        store.set("a.nacl", "content".to_string());
        assert_eq!(store.get("a.nacl"), Some("content"));
        assert_eq!(store.total_size(), 7);
        assert!(store.remove("a.nacl"));
        assert!(!store.remove("a.nacl"));
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_memory_store_rename_prefix() {
        let mut store = MemoryFileStore::new();
        store.set("envs/dev/a.nacl", "a".to_string());
        store.set("common/b.nacl", "b".to_string());
        store.rename_prefix("envs/dev", "envs/prod");
        assert!(store.get("envs/prod/a.nacl").is_some());
        assert!(store.get("envs/dev/a.nacl").is_none());
        assert!(store.get("common/b.nacl").is_some());
    }

    #[test]
    fn test_disk_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DiskFileStore::load(dir.path(), "nacl").unwrap();
        store.set("sub/a.nacl", "type salesforce.Account {}".to_string());
        store.flush().unwrap();

        let reloaded = DiskFileStore::load(dir.path(), "nacl").unwrap();
        assert_eq!(reloaded.get("sub/a.nacl"), Some("type salesforce.Account {}"));

        let mut store = reloaded;
        store.remove("sub/a.nacl");
        store.flush().unwrap();
        let reloaded = DiskFileStore::load(dir.path(), "nacl").unwrap();
        assert!(reloaded.get("sub/a.nacl").is_none());
    }

    #[test]
    fn test_disk_store_ignores_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.nacl"), "vars { a = 1 }").unwrap();
        std::fs::write(dir.path().join("skip.txt"), "nope").unwrap();
        let store = DiskFileStore::load(dir.path(), "nacl").unwrap();
        assert_eq!(store.list(), vec!["keep.nacl".to_string()]);
    }
}
