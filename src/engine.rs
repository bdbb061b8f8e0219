//! The stash engine: the single owner of all durable state.
//!
//! An [`Engine`] is constructed once with its collaborators injected (data
//! root, oracle, clock, random source) and shared by handle between the
//! scanner task, message handlers and the HTTP server.
//!
//! # Concurrency
//!
//! The index, both classification caches, the alias map and the random
//! source live together in one [`Library`] behind a single async mutex.
//! Every load → mutate → persist sequence (ingest, evict, touch) runs inside
//! that lock, so concurrent writers cannot drop each other's updates.
//! Oracle calls are made with the lock released.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::info;

use crate::aliases::AliasMap;
use crate::cache::ClassificationCache;
use crate::config::{load_config, Config};
use crate::db::{self, DataPaths};
use crate::index::Index;
use crate::models::EventContext;
use crate::oracle::{create_oracle, Oracle};
use crate::store::Store;

/// Time source. Injected so tests can control creation order.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;

    fn now_secs(&self) -> i64 {
        self.now_millis().div_euclid(1000)
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Mutable state guarded by the engine's mutual-exclusion boundary.
pub struct Library {
    pub index: Index,
    pub cache: ClassificationCache,
    pub aliases: AliasMap,
    pub rng: StdRng,
}

pub struct Engine {
    pub(crate) paths: DataPaths,
    pub(crate) config: RwLock<Config>,
    pub(crate) store: Store,
    pub(crate) oracle: Arc<dyn Oracle>,
    pub(crate) clock: Arc<dyn Clock>,
    library: Mutex<Library>,
}

/// Builder for [`Engine`]. Anything not supplied is created from defaults:
/// `config.json` under the root, the configured oracle, the system clock and
/// an OS-seeded random source.
pub struct EngineBuilder {
    root: PathBuf,
    config: Option<Config>,
    oracle: Option<Arc<dyn Oracle>>,
    clock: Option<Arc<dyn Clock>>,
    seed: Option<u64>,
}

impl EngineBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config: None,
            oracle: None,
            clock: None,
            seed: None,
        }
    }

    /// Uses `config` instead of reading `config.json`; it is written out.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn Oracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<Engine> {
        DataPaths::new(&self.root).ensure_dirs()?;
        let root = std::fs::canonicalize(&self.root)
            .with_context(|| format!("Failed to resolve data dir: {}", self.root.display()))?;
        let paths = DataPaths::new(root);

        let config = match self.config {
            Some(mut config) => {
                config.validate()?;
                db::save_table(&paths.config, &config)?;
                config
            }
            None => load_config(&paths.config)?,
        };

        for category in &config.categories {
            let dir = paths.categories_dir.join(category);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        db::ensure_table::<std::collections::BTreeMap<String, String>>(&paths.index)?;
        db::ensure_table::<std::collections::BTreeMap<String, String>>(&paths.aliases)?;

        let oracle = match self.oracle {
            Some(o) => o,
            None => create_oracle(&config)?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let store = Store::new(
            &paths,
            config.categories.clone(),
            config.catch_all().to_string(),
        );
        let library = Library {
            index: Index::load(paths.index.clone(), &config),
            cache: ClassificationCache::load(
                paths.desc_cache.clone(),
                paths.emotion_cache.clone(),
            ),
            aliases: AliasMap::load(paths.aliases.clone()),
            rng,
        };

        info!(
            root = %paths.root.display(),
            records = library.index.len(),
            categories = config.categories.len(),
            "stash opened"
        );

        Ok(Engine {
            paths,
            config: RwLock::new(config),
            store,
            oracle,
            clock,
            library: Mutex::new(library),
        })
    }
}

impl Engine {
    /// Opens the stash at `root` with all collaborators from configuration.
    pub fn open(root: impl Into<PathBuf>) -> Result<Engine> {
        EngineBuilder::new(root).build()
    }

    pub fn builder(root: impl Into<PathBuf>) -> EngineBuilder {
        EngineBuilder::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Library> {
        self.library.lock().await
    }

    /// `(descriptions, emotions)` held by the classification cache.
    pub async fn cache_entries(&self) -> (usize, usize) {
        self.lock().await.cache.entry_counts()
    }

    // ============ Runtime toggles ============

    async fn update_config(&self, apply: impl FnOnce(&mut Config)) {
        let mut config = self.config.write().await;
        apply(&mut config);
        config.persist(&self.paths.config);
    }

    pub async fn set_enabled(&self, enabled: bool) {
        self.update_config(|c| c.enabled = enabled).await;
        info!(enabled, "ingestion toggled");
    }

    pub async fn set_auto_send(&self, auto_send: bool) {
        self.update_config(|c| c.auto_send = auto_send).await;
        info!(auto_send, "auto send toggled");
    }

    pub async fn set_vision_provider(&self, provider: &str) {
        let provider = provider.to_string();
        self.update_config(|c| c.vision_provider_id = Some(provider))
            .await;
    }

    pub async fn set_text_provider(&self, provider: &str) {
        let provider = provider.to_string();
        self.update_config(|c| c.text_provider_id = Some(provider))
            .await;
    }

    /// `(vision, text)` provider ids; `None` means "the conversation's provider".
    pub async fn providers(&self) -> (Option<String>, Option<String>) {
        let config = self.config.read().await;
        (
            config.vision_provider_id.clone(),
            config.text_provider_id.clone(),
        )
    }

    // ============ Aliases ============

    pub async fn bind_alias(&self, alias: &str, destination: &str) {
        self.lock().await.aliases.bind(alias, destination);
    }

    pub async fn unbind_alias(&self, alias: &str) -> bool {
        self.lock().await.aliases.unbind(alias)
    }

    pub async fn resolve_alias(&self, alias: &str) -> Option<String> {
        self.lock().await.aliases.resolve(alias).map(str::to_string)
    }

    pub async fn aliases(&self) -> Vec<(String, String)> {
        self.lock().await.aliases.list()
    }
}

/// Fixed provider → conversation provider → configured default.
pub(crate) fn resolve_provider(
    fixed: Option<&String>,
    ctx: Option<&EventContext>,
    default: Option<&String>,
) -> Option<String> {
    fixed
        .or_else(|| ctx.and_then(|c| c.provider_id.as_ref()))
        .or(default)
        .filter(|p| !p.trim().is_empty())
        .cloned()
}

pub(crate) fn vision_provider(config: &Config, ctx: Option<&EventContext>) -> Option<String> {
    resolve_provider(
        config.vision_provider_id.as_ref(),
        ctx,
        config.default_provider.as_ref(),
    )
}

pub(crate) fn text_provider(config: &Config, ctx: Option<&EventContext>) -> Option<String> {
    resolve_provider(
        config.text_provider_id.as_ref(),
        ctx,
        config.default_provider.as_ref(),
    )
}
