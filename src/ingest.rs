//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for one image: fingerprint → optional
//! moderation → cached or oracle classification → store → index insert →
//! capacity enforcement. Oracle failures degrade to catch-all
//! classification; only unreadable input aborts an ingestion.

use std::path::Path;
use tracing::{debug, info, warn};

use crate::capacity;
use crate::config::Config;
use crate::engine::{text_provider, vision_provider, Engine};
use crate::error::Result;
use crate::hasher::{fingerprint, Fingerprint};
use crate::models::{EventContext, ImageSource, IngestOutcome, MemeRecord};
use crate::oracle::{match_category, parse_classification};
use crate::store::{extension_for, sanitize_extension};

/// Classification assembled for one image.
#[derive(Debug, Clone, PartialEq)]
struct Classification {
    category: String,
    tags: Vec<String>,
    description: String,
    emotion: String,
}

impl Engine {
    /// Ingests every image of an inbound chat message.
    ///
    /// No-op when ingestion is switched off. A failure on one image is logged
    /// and does not affect the others.
    pub async fn on_message(
        &self,
        ctx: &EventContext,
        images: Vec<ImageSource>,
    ) -> Vec<IngestOutcome> {
        if !self.config.read().await.enabled {
            debug!(origin = %ctx.origin, "ingestion disabled, ignoring message images");
            return Vec::new();
        }
        let mut outcomes = Vec::with_capacity(images.len());
        for image in images {
            match self.ingest(Some(ctx), image).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(origin = %ctx.origin, error = %e, "failed to ingest message image"),
            }
        }
        outcomes
    }

    /// Runs one image through the pipeline.
    ///
    /// `ctx` is the originating conversation, or `None` for scanner input.
    /// Returns `Err` only when the image could not be written to the store.
    pub async fn ingest(
        &self,
        ctx: Option<&EventContext>,
        source: ImageSource,
    ) -> Result<IngestOutcome> {
        let (bytes, ext, scanner_file) = match source {
            ImageSource::Bytes { data, ext } => {
                let ext = ext
                    .as_deref()
                    .and_then(sanitize_extension)
                    .unwrap_or_else(|| extension_for(None, &data));
                (data, ext, None)
            }
            ImageSource::File(path) => match tokio::fs::read(&path).await {
                Ok(data) => {
                    let ext = extension_for(Some(&path), &data);
                    (data, ext, Some(path))
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot read image source");
                    return Ok(IngestOutcome::HashError);
                }
            },
        };

        let fp = fingerprint(&bytes);
        if fp.is_empty() {
            warn!("empty image source, skipping");
            return Ok(IngestOutcome::HashError);
        }

        let config = self.config.read().await.clone();

        if config.content_filtration && !self.admissible(&config, ctx, &bytes).await {
            info!(fingerprint = %fp, "image rejected by moderation");
            if let Some(path) = &scanner_file {
                remove_source(path).await;
            }
            return Ok(IngestOutcome::Rejected);
        }

        let classification = self.classify(&config, ctx, &fp, &bytes).await;

        let now_millis = self.clock.now_millis();
        let mut guard = self.lock().await;
        let lib = &mut *guard;

        let id = self.store.save(
            &bytes,
            &classification.category,
            &ext,
            now_millis,
            &mut lib.rng,
        )?;

        lib.index.insert(MemeRecord {
            id: id.clone(),
            category: classification.category,
            tags: classification.tags,
            description: classification.description,
            emotion: classification.emotion,
            backend_tag: config.backend_tag.clone(),
            created_at: now_millis.div_euclid(1000),
            usage_count: 0,
            last_used: None,
        });
        lib.index.persist();

        let evicted = capacity::enforce(
            &mut lib.index,
            &self.store,
            config.max_reg_num,
            config.do_replace,
        );
        if evicted.contains(&id) {
            info!(id = %id, "new image evicted immediately, library full of used items");
        }

        info!(id = %id, fingerprint = %fp, "image stored");
        Ok(IngestOutcome::Stored(id))
    }

    /// Moderation verdict. Oracle failure admits the image.
    async fn admissible(&self, config: &Config, ctx: Option<&EventContext>, bytes: &[u8]) -> bool {
        let Some(provider) = vision_provider(config, ctx) else {
            warn!("no provider for moderation, admitting image");
            return true;
        };
        match self
            .oracle
            .moderate(&provider, bytes, &config.filtration_prompt)
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "moderation unavailable, admitting image");
                true
            }
        }
    }

    async fn classify(
        &self,
        config: &Config,
        ctx: Option<&EventContext>,
        fp: &Fingerprint,
        bytes: &[u8],
    ) -> Classification {
        let catch_all = config.catch_all().to_string();
        let vision = vision_provider(config, ctx);
        let text = text_provider(config, ctx);

        let cached_description = self.lock().await.cache.get_description(fp);
        let description = match cached_description {
            Some(d) => {
                debug!(fingerprint = %fp, "description cache hit");
                d
            }
            None => self.describe(vision.as_deref(), fp, bytes).await,
        };

        let cached_emotion = self.lock().await.cache.get_emotion(fp);
        let emotion = match cached_emotion {
            Some(e) => {
                debug!(fingerprint = %fp, "emotion cache hit");
                Some(e)
            }
            None if description.is_empty() => None,
            None => self.emotion_of(config, text.as_deref(), fp, &description).await,
        };

        let (category, tags) = match vision.as_deref() {
            Some(provider) => match self
                .oracle
                .classify_image(provider, bytes, &config.categories)
                .await
            {
                Ok(raw) => parse_classification(&raw, &config.categories, &catch_all),
                Err(e) => {
                    warn!(error = %e, "image classification failed, using catch-all");
                    (catch_all.clone(), Vec::new())
                }
            },
            None => {
                warn!("no vision provider resolvable, using catch-all");
                (catch_all.clone(), Vec::new())
            }
        };

        let emotion = emotion.unwrap_or_else(|| category.clone());
        Classification {
            category,
            tags,
            description,
            emotion,
        }
    }

    async fn describe(&self, provider: Option<&str>, fp: &Fingerprint, bytes: &[u8]) -> String {
        let Some(provider) = provider else {
            return String::new();
        };
        match self.oracle.describe_image(provider, bytes).await {
            Ok(d) if !d.trim().is_empty() => {
                let d = d.trim().to_string();
                self.lock().await.cache.put_description(fp, &d);
                d
            }
            Ok(_) => String::new(),
            Err(e) => {
                warn!(error = %e, "image description failed");
                String::new()
            }
        }
    }

    async fn emotion_of(
        &self,
        config: &Config,
        provider: Option<&str>,
        fp: &Fingerprint,
        description: &str,
    ) -> Option<String> {
        let provider = provider?;
        match self
            .oracle
            .classify_text(provider, description, &config.categories)
            .await
        {
            Ok(raw) => {
                let emotion = match_category(&raw, &config.categories, config.catch_all());
                self.lock().await.cache.put_emotion(fp, &emotion);
                Some(emotion)
            }
            Err(e) => {
                warn!(error = %e, "emotion classification failed");
                None
            }
        }
    }
}

pub(crate) async fn remove_source(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove source file"),
    }
}
