//! The on-disk index of classified images.
//!
//! Maps storage id → [`MemeRecord`]. The index is loaded once at startup,
//! normalized (legacy defaults applied, categories coerced into the
//! configured set) and written through after every mutation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

use crate::config::Config;
use crate::db;
use crate::models::MemeRecord;

pub struct Index {
    path: PathBuf,
    records: BTreeMap<String, MemeRecord>,
}

impl Index {
    pub fn load(path: PathBuf, config: &Config) -> Self {
        let mut records: BTreeMap<String, MemeRecord> = db::load_table(&path);
        for (id, rec) in records.iter_mut() {
            rec.normalize(id, |c| config.resolve_category(c));
        }
        Self { path, records }
    }

    /// Writes the index to disk. Failures are logged; memory stays authoritative.
    pub fn persist(&self) {
        if let Err(e) = db::save_table(&self.path, &self.records) {
            warn!(error = %e, "index write failed, keeping in-memory index");
        }
    }

    pub fn insert(&mut self, record: MemeRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn remove(&mut self, id: &str) -> Option<MemeRecord> {
        self.records.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&MemeRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut MemeRecord> {
        self.records.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &MemeRecord> {
        self.records.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, category: &str) -> MemeRecord {
        MemeRecord {
            id: id.to_string(),
            category: category.to_string(),
            tags: vec!["t".to_string()],
            description: "desc".to_string(),
            emotion: category.to_string(),
            backend_tag: "test".to_string(),
            created_at: 10,
            usage_count: 0,
            last_used: None,
        }
    }

    #[test]
    fn test_insert_persist_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");
        let config = Config::default();

        let mut index = Index::load(path.clone(), &config);
        assert!(index.is_empty());
        index.insert(record("a.png", "开心"));
        index.insert(record("b.png", "伤心"));
        index.persist();

        let reloaded = Index::load(path, &config);
        assert_eq!(reloaded.len(), 2);
        let a = reloaded.get("a.png").unwrap();
        assert_eq!(a.id, "a.png");
        assert_eq!(a.category, "开心");
    }

    #[test]
    fn test_unique_keys() {
        let tmp = TempDir::new().unwrap();
        let mut index = Index::load(tmp.path().join("index.json"), &Config::default());
        index.insert(record("a.png", "开心"));
        index.insert(record("a.png", "伤心"));
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a.png").unwrap().category, "伤心");
    }

    #[test]
    fn test_legacy_index_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");
        std::fs::write(
            &path,
            r#"{"/data/categories/开心/1_1000.jpg": {"category": "开心", "tags": ["可爱"]},
                "/data/categories/x/2_2000.jpg": {"category": "whatever", "tags": []}}"#,
        )
        .unwrap();
        let index = Index::load(path, &Config::default());
        let a = index.get("/data/categories/开心/1_1000.jpg").unwrap();
        assert_eq!(a.emotion, "开心");
        let b = index.get("/data/categories/x/2_2000.jpg").unwrap();
        assert_eq!(b.category, "其它");
    }
}
