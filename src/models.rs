//! Core data models used throughout the stash.
//!
//! These types represent the classified records, ingestion inputs and
//! outcomes, and the query results that flow between the ingestion pipeline
//! and the retrieval service.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One classified, stored image.
///
/// `id` is the working-set storage path and doubles as the index key, so it
/// is not serialized inside the record itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemeRecord {
    #[serde(skip)]
    pub id: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    /// Empty only transiently while loading legacy entries; normalized to
    /// `category` by [`MemeRecord::normalize`].
    #[serde(default)]
    pub emotion: String,
    #[serde(default)]
    pub backend_tag: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub last_used: Option<i64>,
}

impl MemeRecord {
    /// Applies the load-time defaulting rules for legacy or partial entries.
    pub fn normalize(&mut self, id: &str, resolve_category: impl Fn(&str) -> String) {
        self.id = id.to_string();
        self.category = resolve_category(&self.category);
        if self.emotion.trim().is_empty() {
            self.emotion = self.category.clone();
        }
        self.tags.truncate(crate::oracle::MAX_TAGS);
    }

    /// The label used for emotion queries.
    pub fn emotion_label(&self) -> &str {
        if self.emotion.is_empty() {
            &self.category
        } else {
            &self.emotion
        }
    }

    pub fn summary(&self) -> MemeSummary {
        MemeSummary {
            id: self.id.clone(),
            description: self.description.clone(),
            emotion: self.emotion_label().to_string(),
        }
    }
}

/// Conversation the ingestion or reply belongs to.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    /// Destination address replies go back to.
    pub origin: String,
    /// Oracle provider currently selected for the conversation.
    pub provider_id: Option<String>,
}

/// Where the bytes being ingested came from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Bytes delivered by the host, with an optional file extension hint.
    Bytes { data: Vec<u8>, ext: Option<String> },
    /// A scanner-owned file in the watch folder.
    File(PathBuf),
}

/// Result of a single ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored(String),
    Rejected,
    HashError,
}

/// Lightweight row returned by sampling queries.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MemeSummary {
    pub id: String,
    pub description: String,
    pub emotion: String,
}

/// Capacity summary for the host.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LibraryStatus {
    pub current_count: usize,
    pub max_count: usize,
    pub available_emojis: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_entry_defaults() {
        let mut rec: MemeRecord =
            serde_json::from_str(r#"{"category": "开心", "tags": ["可爱"]}"#).unwrap();
        rec.normalize("categories/开心/1_1234.jpg", |c| c.to_string());
        assert_eq!(rec.emotion, "开心");
        assert_eq!(rec.usage_count, 0);
        assert!(rec.last_used.is_none());
        assert_eq!(rec.id, "categories/开心/1_1234.jpg");
    }

    #[test]
    fn test_unknown_category_coerced_on_load() {
        let mut rec: MemeRecord = serde_json::from_str(r#"{"category": "??"}"#).unwrap();
        rec.normalize("x", |_| "其它".to_string());
        assert_eq!(rec.category, "其它");
        assert_eq!(rec.emotion, "其它");
    }

    #[test]
    fn test_id_not_serialized() {
        let rec = MemeRecord {
            id: "a/b.png".to_string(),
            category: "开心".to_string(),
            tags: vec![],
            description: String::new(),
            emotion: "开心".to_string(),
            backend_tag: String::new(),
            created_at: 1,
            usage_count: 0,
            last_used: None,
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert!(json.get("id").is_none());
    }
}
