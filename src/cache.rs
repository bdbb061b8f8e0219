//! Fingerprint-keyed classification cache.
//!
//! Two independent tables map a content fingerprint to the description and
//! to the emotion label computed for those bytes. Entries are never evicted.
//! Every put is written through to disk; a failed write is logged and the
//! in-memory entry is still honored for the rest of the process lifetime.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::db;
use crate::hasher::Fingerprint;

#[derive(Debug, Default)]
struct CacheTable {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl CacheTable {
    fn load(path: PathBuf) -> Self {
        let entries = db::load_table(&path);
        Self { path, entries }
    }

    fn get(&self, fp: &Fingerprint) -> Option<&str> {
        if fp.is_empty() {
            return None;
        }
        self.entries.get(fp.as_str()).map(String::as_str)
    }

    fn put(&mut self, fp: &Fingerprint, value: &str) {
        if fp.is_empty() || value.trim().is_empty() {
            return;
        }
        self.entries.insert(fp.to_string(), value.to_string());
        if let Err(e) = db::save_table(&self.path, &self.entries) {
            warn!(error = %e, "cache write failed, keeping entry in memory");
        }
    }
}

/// Description and emotion caches keyed by content fingerprint.
#[derive(Debug, Default)]
pub struct ClassificationCache {
    descriptions: CacheTable,
    emotions: CacheTable,
}

impl ClassificationCache {
    pub fn load(desc_path: PathBuf, emotion_path: PathBuf) -> Self {
        let cache = Self {
            descriptions: CacheTable::load(desc_path),
            emotions: CacheTable::load(emotion_path),
        };
        debug!(
            descriptions = cache.descriptions.entries.len(),
            emotions = cache.emotions.entries.len(),
            "classification cache loaded"
        );
        cache
    }

    pub fn get_description(&self, fp: &Fingerprint) -> Option<String> {
        self.descriptions.get(fp).map(str::to_string)
    }

    pub fn put_description(&mut self, fp: &Fingerprint, description: &str) {
        self.descriptions.put(fp, description);
    }

    pub fn get_emotion(&self, fp: &Fingerprint) -> Option<String> {
        self.emotions.get(fp).map(str::to_string)
    }

    pub fn put_emotion(&mut self, fp: &Fingerprint, emotion: &str) {
        self.emotions.put(fp, emotion);
    }

    pub fn entry_counts(&self) -> (usize, usize) {
        (self.descriptions.entries.len(), self.emotions.entries.len())
    }
}
