//! Capacity enforcement for the working set.
//!
//! Eviction order is least-used first, oldest first among equal usage.
//! Records created within the same second are ordered by file name (creation
//! millis first) and then by storage id, so the order is total.
//! When eviction is disabled the cap is soft and the library may grow past it.

use std::path::Path;
use tracing::{info, warn};

use crate::index::Index;
use crate::store::Store;

/// Evicts records until `index.len() <= max_size`, returning the evicted ids.
///
/// Each eviction deletes the backing file before dropping the index entry.
/// The index is persisted once if anything was evicted.
pub fn enforce(index: &mut Index, store: &Store, max_size: usize, do_replace: bool) -> Vec<String> {
    let len = index.len();
    if len <= max_size {
        return Vec::new();
    }
    if !do_replace {
        info!(len, max_size, "library over capacity, eviction disabled");
        return Vec::new();
    }

    let victims = eviction_order(index, len - max_size);
    for id in &victims {
        if let Err(e) = store.delete(id) {
            warn!(id = %id, error = %e, "failed to delete evicted file");
        }
        index.remove(id);
    }
    index.persist();

    info!(evicted = victims.len(), max_size, "capacity enforced");
    victims
}

/// The first `count` ids in eviction order.
///
/// `created_at` has one-second resolution, so ties are broken on the stored
/// file name, which starts with the creation millis. The category directory
/// in front of it must not take part in the comparison.
fn eviction_order(index: &Index, count: usize) -> Vec<String> {
    let mut candidates: Vec<(u64, i64, String, &str)> = index
        .records()
        .map(|r| (r.usage_count, r.created_at, file_name(&r.id), r.id.as_str()))
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .take(count)
        .map(|(_, _, _, id)| id.to_string())
        .collect()
}

fn file_name(id: &str) -> String {
    Path::new(id)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::DataPaths;
    use crate::models::MemeRecord;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        index: Index,
        store: Store,
        rng: StdRng,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let paths = DataPaths::new(tmp.path());
        paths.ensure_dirs().unwrap();
        let config = Config::default();
        let store = Store::new(
            &paths,
            config.categories.clone(),
            config.catch_all().to_string(),
        );
        let index = Index::load(paths.index.clone(), &config);
        Fixture {
            _tmp: tmp,
            index,
            store,
            rng: StdRng::seed_from_u64(1),
        }
    }

    impl Fixture {
        fn add(&mut self, usage: u64, created_at: i64) -> String {
            self.add_at("开心", usage, created_at * 1000)
        }

        fn add_at(&mut self, category: &str, usage: u64, millis: i64) -> String {
            let created_at = millis.div_euclid(1000);
            let id = self
                .store
                .save(b"img", category, ".jpg", millis, &mut self.rng)
                .unwrap();
            self.index.insert(MemeRecord {
                id: id.clone(),
                category: category.to_string(),
                tags: vec![],
                description: String::new(),
                emotion: category.to_string(),
                backend_tag: String::new(),
                created_at,
                usage_count: usage,
                last_used: None,
            });
            id
        }
    }

    #[test]
    fn test_under_cap_is_noop() {
        let mut f = fixture();
        f.add(0, 1);
        assert!(enforce(&mut f.index, &f.store, 5, true).is_empty());
        assert_eq!(f.index.len(), 1);
    }

    #[test]
    fn test_evicts_least_used_then_oldest() {
        let mut f = fixture();
        let t1 = f.add(0, 1);
        let t2 = f.add(0, 2);
        let t3 = f.add(5, 3);

        let evicted = enforce(&mut f.index, &f.store, 2, true);
        assert_eq!(evicted, vec![t1.clone()]);
        assert!(f.index.get(&t1).is_none());
        assert!(!f.store.exists(&t1));
        assert!(f.index.get(&t2).is_some());
        assert!(f.index.get(&t3).is_some());
    }

    #[test]
    fn test_same_second_ties_follow_creation_millis() {
        let mut f = fixture();
        // "伤心" sorts before "开心", so comparing full paths would evict the newer one
        let older = f.add_at("开心", 0, 1_700_000_000_000);
        let newer = f.add_at("伤心", 0, 1_700_000_000_100);

        let evicted = enforce(&mut f.index, &f.store, 1, true);
        assert_eq!(evicted, vec![older.clone()]);
        assert!(!f.store.exists(&older));
        assert!(f.store.exists(&newer));
    }

    #[test]
    fn test_never_evicts_used_before_unused() {
        let mut f = fixture();
        let used = f.add(5, 1);
        f.add(0, 2);
        f.add(0, 3);
        let evicted = enforce(&mut f.index, &f.store, 1, true);
        assert_eq!(evicted.len(), 2);
        assert!(!evicted.contains(&used));
        assert_eq!(f.index.len(), 1);
    }

    #[test]
    fn test_disabled_allows_overshoot() {
        let mut f = fixture();
        f.add(0, 1);
        f.add(0, 2);
        f.add(0, 3);
        assert!(enforce(&mut f.index, &f.store, 1, false).is_empty());
        assert_eq!(f.index.len(), 3);
    }

    #[test]
    fn test_missing_file_still_removes_record() {
        let mut f = fixture();
        let gone = f.add(0, 1);
        f.add(1, 2);
        std::fs::remove_file(&gone).unwrap();
        let evicted = enforce(&mut f.index, &f.store, 1, true);
        assert_eq!(evicted, vec![gone]);
        assert_eq!(f.index.len(), 1);
    }
}
