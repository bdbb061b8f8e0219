//! Queries over the index and the delivery paths built on them.
//!
//! Records whose backing file has vanished are skipped lazily by every
//! query. Selection paths (emotion/description lookup, manual send, push,
//! auto-reply) record usage through [`Engine::touch`]; listing and status
//! queries do not.

use rand::seq::{index, IndexedRandom};
use rand::Rng;
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::{text_provider, Engine, Library};
use crate::host::Host;
use crate::models::{EventContext, LibraryStatus, MemeRecord, MemeSummary};
use crate::oracle::match_category;

/// Why a send or push produced no image.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("category does not exist: {0}")]
    UnknownCategory(String),
    #[error("category has no items: {0}")]
    EmptyCategory(String),
    #[error("alias does not exist: {0}")]
    UnknownAlias(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl Engine {
    pub async fn count(&self) -> usize {
        self.lock().await.index.len()
    }

    pub async fn status(&self) -> LibraryStatus {
        let max_count = self.config.read().await.max_reg_num;
        let lib = self.lock().await;
        LibraryStatus {
            current_count: lib.index.len(),
            max_count,
            available_emojis: lib
                .index
                .records()
                .filter(|r| self.store.exists(&r.id))
                .count(),
        }
    }

    /// Distinct emotion labels of live records, sorted.
    pub async fn emotions(&self) -> Vec<String> {
        let lib = self.lock().await;
        lib.index
            .records()
            .filter(|r| self.store.exists(&r.id))
            .map(|r| r.emotion_label().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct non-empty descriptions of live records, sorted.
    pub async fn descriptions(&self) -> Vec<String> {
        let lib = self.lock().await;
        lib.index
            .records()
            .filter(|r| !r.description.is_empty() && self.store.exists(&r.id))
            .map(|r| r.description.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Up to `n` distinct live records chosen uniformly at random.
    pub async fn random_sample(&self, n: usize) -> Vec<MemeSummary> {
        let mut guard = self.lock().await;
        let lib = &mut *guard;
        let live: Vec<&MemeRecord> = lib
            .index
            .records()
            .filter(|r| self.store.exists(&r.id))
            .collect();
        let amount = n.min(live.len());
        index::sample(&mut lib.rng, live.len(), amount)
            .into_iter()
            .map(|i| live[i].summary())
            .collect()
    }

    /// Random live record whose emotion (or category) equals `label`, or
    /// whose tags contain `label` exactly. Records the usage.
    pub async fn by_emotion(&self, label: &str) -> Option<MemeRecord> {
        let label = label.trim();
        if label.is_empty() {
            return None;
        }
        let mut guard = self.lock().await;
        let lib = &mut *guard;
        let candidates = self.live_ids(lib, |r| {
            r.emotion_label() == label || r.tags.iter().any(|t| t == label)
        });
        self.pick_and_touch(lib, &candidates)
    }

    /// Random live record whose description contains `substring`, falling
    /// back to records with a tag containing it. Records the usage.
    pub async fn by_description(&self, substring: &str) -> Option<MemeRecord> {
        let substring = substring.trim();
        if substring.is_empty() {
            return None;
        }
        let mut guard = self.lock().await;
        let lib = &mut *guard;
        let mut candidates = self.live_ids(lib, |r| r.description.contains(substring));
        if candidates.is_empty() {
            candidates = self.live_ids(lib, |r| r.tags.iter().any(|t| t.contains(substring)));
        }
        self.pick_and_touch(lib, &candidates)
    }

    /// Increments `usage_count` and stamps `last_used`. Returns whether the
    /// record exists.
    pub async fn touch(&self, id: &str) -> bool {
        let now = self.clock.now_secs();
        let mut lib = self.lock().await;
        touch_locked(&mut lib, id, now).is_some()
    }

    /// Picks a random working-set file of `category` (manual send).
    ///
    /// An empty category name means the catch-all.
    pub async fn send_category(&self, category: &str) -> Result<PathBuf, SendError> {
        let category = if category.trim().is_empty() {
            self.config.read().await.catch_all().to_string()
        } else {
            category.trim().to_string()
        };
        if !self.store.is_known_category(&category) {
            return Err(SendError::UnknownCategory(category));
        }

        let now = self.clock.now_secs();
        let mut guard = self.lock().await;
        let lib = &mut *guard;

        let files = self
            .store
            .list(&category)
            .map_err(|e| SendError::Delivery(e.to_string()))?;
        let pick = files
            .choose(&mut lib.rng)
            .cloned()
            .ok_or_else(|| SendError::EmptyCategory(category.clone()))?;

        if touch_locked(lib, &pick, now).is_none() {
            debug!(id = %pick, "sent file is not indexed");
        }
        Ok(PathBuf::from(pick))
    }

    /// Sends a random image of `category` to the alias destination, or to
    /// `origin` when no alias is given.
    pub async fn push(
        &self,
        category: &str,
        alias: Option<&str>,
        origin: &str,
        host: &dyn Host,
    ) -> Result<PathBuf, SendError> {
        let destination = match alias.filter(|a| !a.is_empty()) {
            Some(a) => self
                .resolve_alias(a)
                .await
                .ok_or_else(|| SendError::UnknownAlias(a.to_string()))?,
            None => origin.to_string(),
        };
        let path = self.send_category(category).await?;
        host.send_image(&destination, &path)
            .await
            .map_err(|e| SendError::Delivery(e.to_string()))?;
        info!(destination = %destination, path = %path.display(), "image pushed");
        Ok(path)
    }

    /// Unsolicited reply: with probability `emoji_chance`, classify the
    /// outgoing `text` and send a matching image back to the conversation.
    pub async fn auto_reply(
        &self,
        ctx: &EventContext,
        text: &str,
        host: &dyn Host,
    ) -> Option<PathBuf> {
        let config = self.config.read().await.clone();
        if !config.auto_send || text.trim().is_empty() {
            return None;
        }
        let roll: f64 = self.lock().await.rng.random();
        if roll >= config.emoji_chance {
            return None;
        }

        let provider = text_provider(&config, Some(ctx))?;
        let label = match self
            .oracle
            .classify_text(&provider, text, &config.categories)
            .await
        {
            Ok(raw) => match_category(&raw, &config.categories, config.catch_all()),
            Err(e) => {
                warn!(error = %e, "reply emotion classification failed");
                return None;
            }
        };

        let record = self.by_emotion(&label).await?;
        let path = PathBuf::from(&record.id);
        if let Err(e) = host.send_image(&ctx.origin, &path).await {
            warn!(error = %e, "auto reply delivery failed");
            return None;
        }
        debug!(label = %label, id = %record.id, "auto reply sent");
        Some(path)
    }

    fn live_ids(&self, lib: &Library, matches: impl Fn(&MemeRecord) -> bool) -> Vec<String> {
        lib.index
            .records()
            .filter(|r| matches(r) && self.store.exists(&r.id))
            .map(|r| r.id.clone())
            .collect()
    }

    fn pick_and_touch(&self, lib: &mut Library, candidates: &[String]) -> Option<MemeRecord> {
        let id = candidates.choose(&mut lib.rng)?.clone();
        touch_locked(lib, &id, self.clock.now_secs())
    }
}

fn touch_locked(lib: &mut Library, id: &str, now: i64) -> Option<MemeRecord> {
    let record = lib.index.get_mut(id)?;
    record.usage_count += 1;
    record.last_used = Some(now);
    let updated = record.clone();
    lib.index.persist();
    Some(updated)
}
