use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::db::{self, DataPaths};

/// Built-in emotion categories. The last entry is the catch-all.
pub const DEFAULT_CATEGORIES: [&str; 12] = [
    "开心", "搞怪", "无语", "伤心", "愤怒", "害羞", "震惊", "奸笑", "哭泣", "疑惑", "尴尬", "其它",
];

/// Preferred catch-all category name.
pub const CATCH_ALL: &str = "其它";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub auto_send: bool,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub backend_tag: String,
    #[serde(default = "default_emoji_chance")]
    pub emoji_chance: f64,
    #[serde(default = "default_max_reg_num")]
    pub max_reg_num: usize,
    #[serde(default = "default_true")]
    pub do_replace: bool,
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default = "default_true")]
    pub steal_emoji: bool,
    #[serde(default)]
    pub content_filtration: bool,
    #[serde(default = "default_filtration_prompt")]
    pub filtration_prompt: String,

    #[serde(default)]
    pub vision_provider_id: Option<String>,
    #[serde(default)]
    pub text_provider_id: Option<String>,
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub watch_dir: Option<PathBuf>,

    #[serde(default)]
    pub oracle_base_url: String,
    #[serde(default = "default_api_key_env")]
    pub oracle_api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub oracle_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub oracle_max_retries: u32,

    #[serde(default = "default_server_bind")]
    pub server_bind: String,
}

fn default_true() -> bool {
    true
}
fn default_emoji_chance() -> f64 {
    0.3
}
fn default_max_reg_num() -> usize {
    100
}
fn default_check_interval() -> u64 {
    10
}
fn default_filtration_prompt() -> String {
    "符合公序良俗，不含色情、暴力或政治敏感内容".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_server_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_send: true,
            categories: default_categories(),
            backend_tag: String::new(),
            emoji_chance: default_emoji_chance(),
            max_reg_num: default_max_reg_num(),
            do_replace: true,
            check_interval: default_check_interval(),
            steal_emoji: true,
            content_filtration: false,
            filtration_prompt: default_filtration_prompt(),
            vision_provider_id: None,
            text_provider_id: None,
            default_provider: None,
            watch_dir: None,
            oracle_base_url: String::new(),
            oracle_api_key_env: default_api_key_env(),
            oracle_timeout_secs: default_timeout_secs(),
            oracle_max_retries: default_max_retries(),
            server_bind: default_server_bind(),
        }
    }
}

pub fn default_categories() -> Vec<String> {
    DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect()
}

impl Config {
    /// The category unrecognized classifications are coerced to.
    pub fn catch_all(&self) -> &str {
        if self.categories.iter().any(|c| c == CATCH_ALL) {
            return CATCH_ALL;
        }
        self.categories.last().map(String::as_str).unwrap_or(CATCH_ALL)
    }

    /// Maps a category name onto the configured set.
    pub fn resolve_category(&self, name: &str) -> String {
        let name = name.trim();
        if self.categories.iter().any(|c| c == name) {
            name.to_string()
        } else {
            self.catch_all().to_string()
        }
    }

    /// Scanner period; never shorter than one minute.
    pub fn scan_period(&self) -> Duration {
        Duration::from_secs(self.check_interval.max(1) * 60)
    }

    pub fn watch_dir(&self, paths: &DataPaths) -> PathBuf {
        self.watch_dir
            .clone()
            .unwrap_or_else(|| paths.root.join("watch"))
    }

    pub fn oracle_enabled(&self) -> bool {
        !self.oracle_base_url.trim().is_empty()
    }

    /// Normalizes the category list and checks value ranges.
    ///
    /// An empty category list becomes the default set; duplicate names are
    /// dropped keeping the first occurrence.
    pub fn validate(&mut self) -> Result<()> {
        if self.categories.is_empty() {
            self.categories = default_categories();
        }
        let mut seen = HashSet::new();
        self.categories.retain(|c| seen.insert(c.clone()));

        if !(0.0..=1.0).contains(&self.emoji_chance) {
            bail!("emoji_chance must be in [0.0, 1.0]");
        }

        if self.max_reg_num == 0 {
            bail!("max_reg_num must be >= 1");
        }

        Ok(())
    }

    /// Writes the configuration back to `config.json`.
    pub fn persist(&self, path: &Path) {
        if let Err(e) = db::save_table(path, self) {
            warn!(error = %e, "failed to persist configuration");
        }
    }
}

/// Loads `config.json`, writing defaults when the file does not exist yet.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let config = Config::default();
        db::save_table(path, &config)
            .with_context(|| format!("Failed to write default config: {}", path.display()))?;
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_writes_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        let config = load_config(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.categories.len(), 12);
        assert_eq!(config.catch_all(), "其它");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"max_reg_num": 5, "categories": []}"#).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.max_reg_num, 5);
        assert!(config.enabled);
        assert_eq!(config.categories, default_categories());
    }

    #[test]
    fn test_custom_categories_replace_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"categories": ["happy", "sad", "misc"]}"#).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.catch_all(), "misc");
        assert_eq!(config.resolve_category("sad"), "sad");
        assert_eq!(config.resolve_category("angry"), "misc");
    }

    #[test]
    fn test_rejects_bad_emoji_chance() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"emoji_chance": 1.5}"#).unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_duplicate_categories_removed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"categories": ["happy", "sad", "happy", "misc", "sad"]}"#)
            .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.categories, vec!["happy", "sad", "misc"]);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = Config {
            max_reg_num: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let mut config = Config {
            emoji_chance: -0.1,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scan_period_minimum() {
        let config = Config {
            check_interval: 0,
            ..Config::default()
        };
        assert_eq!(config.scan_period(), Duration::from_secs(60));
    }
}
