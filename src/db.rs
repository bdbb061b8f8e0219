//! Data directory layout and JSON table persistence.
//!
//! Every durable table (index, caches, aliases, config) is a single JSON
//! object on disk. Writes go to a sibling temp file first and are renamed
//! into place so a crash never leaves a half-written table behind.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Result, StashError};

/// Resolved locations of everything under the data directory.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub root: PathBuf,
    pub raw_dir: PathBuf,
    pub categories_dir: PathBuf,
    pub index: PathBuf,
    pub desc_cache: PathBuf,
    pub emotion_cache: PathBuf,
    pub aliases: PathBuf,
    pub config: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            raw_dir: root.join("raw"),
            categories_dir: root.join("categories"),
            index: root.join("index.json"),
            desc_cache: root.join("desc_cache.json"),
            emotion_cache: root.join("emotion_cache.json"),
            aliases: root.join("aliases.json"),
            config: root.join("config.json"),
            root,
        }
    }

    /// Creates the directory skeleton. Idempotent.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.root, &self.raw_dir, &self.categories_dir] {
            std::fs::create_dir_all(dir).map_err(|e| StashError::persistence(dir, e))?;
        }
        Ok(())
    }
}

/// Reads a JSON table. A missing or unparseable file yields the default value.
pub fn load_table<T: DeserializeOwned + Default>(path: &Path) -> T {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read table, starting empty");
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse table, starting empty");
            T::default()
        }
    }
}

/// Writes a JSON table atomically (temp file + rename).
pub fn save_table<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StashError::persistence(parent, e))?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes).map_err(|e| StashError::persistence(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| StashError::persistence(path, e))?;
    Ok(())
}

/// Writes a table if it does not exist yet.
pub fn ensure_table<T: Serialize + Default>(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    save_table(path, &T::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_table_is_default() {
        let tmp = TempDir::new().unwrap();
        let table: BTreeMap<String, String> = load_table(&tmp.path().join("nope.json"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_corrupt_table_is_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");
        std::fs::write(&path, "{not json").unwrap();
        let table: BTreeMap<String, String> = load_table(&path);
        assert!(table.is_empty());
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("aliases.json");
        let mut table = BTreeMap::new();
        table.insert("group".to_string(), "qq:123".to_string());
        save_table(&path, &table).unwrap();
        assert!(path.exists());
        assert!(!tmp.path().join("aliases.json.tmp").exists());
        let back: BTreeMap<String, String> = load_table(&path);
        assert_eq!(back, table);
    }

    #[test]
    fn test_ensure_dirs() {
        let tmp = TempDir::new().unwrap();
        let paths = DataPaths::new(tmp.path().join("data"));
        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();
        assert!(paths.raw_dir.is_dir());
        assert!(paths.categories_dir.is_dir());
    }
}
