//! Human-chosen short names for delivery destinations.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

use crate::db;

pub struct AliasMap {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl AliasMap {
    pub fn load(path: PathBuf) -> Self {
        let entries = db::load_table(&path);
        Self { path, entries }
    }

    fn persist(&self) {
        if let Err(e) = db::save_table(&self.path, &self.entries) {
            warn!(error = %e, "alias write failed, keeping in-memory aliases");
        }
    }

    /// Binds `alias` to `destination`, replacing any previous binding.
    pub fn bind(&mut self, alias: &str, destination: &str) {
        self.entries
            .insert(alias.to_string(), destination.to_string());
        self.persist();
    }

    /// Returns whether the alias existed.
    pub fn unbind(&mut self, alias: &str) -> bool {
        let existed = self.entries.remove(alias).is_some();
        if existed {
            self.persist();
        }
        existed
    }

    pub fn resolve(&self, alias: &str) -> Option<&str> {
        self.entries.get(alias).map(String::as_str)
    }

    pub fn list(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
