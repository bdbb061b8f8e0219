//! Watch-folder scanner.
//!
//! A cancellable periodic task. Each cycle lists the image files dropped
//! into the watch folder, feeds each one through the ingestion pipeline
//! without conversation context, and deletes the original whatever the
//! outcome, so the folder is always drained.

use anyhow::Result;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::engine::Engine;
use crate::ingest::remove_source;
use crate::models::{ImageSource, IngestOutcome};

const IMAGE_GLOBS: [&str; 6] = ["*.jpg", "*.jpeg", "*.png", "*.gif", "*.webp", "*.bmp"];

/// Tally of one scanner cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub skipped: bool,
    pub discovered: usize,
    pub stored: usize,
    pub rejected: usize,
    pub hash_errors: usize,
    pub failed: usize,
}

/// Image files directly inside `dir`, sorted. A missing folder is empty.
pub fn list_watch_folder(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let include_set = build_globset(&IMAGE_GLOBS)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if include_set.is_match(&name) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    Ok(builder.build()?)
}

impl Engine {
    /// Runs a single scanner cycle.
    pub async fn scan_once(&self) -> ScanReport {
        let config = self.config.read().await.clone();
        if !config.enabled || !config.steal_emoji {
            debug!("watch folder ingestion disabled, skipping cycle");
            return ScanReport {
                skipped: true,
                ..ScanReport::default()
            };
        }

        let watch_dir = config.watch_dir(&self.paths);
        let files = match list_watch_folder(&watch_dir) {
            Ok(files) => files,
            Err(e) => {
                warn!(dir = %watch_dir.display(), error = %e, "failed to list watch folder");
                return ScanReport::default();
            }
        };

        let mut report = ScanReport {
            discovered: files.len(),
            ..ScanReport::default()
        };

        for path in files {
            match self.ingest(None, ImageSource::File(path.clone())).await {
                Ok(IngestOutcome::Stored(_)) => report.stored += 1,
                Ok(IngestOutcome::Rejected) => report.rejected += 1,
                Ok(IngestOutcome::HashError) => report.hash_errors += 1,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "watch folder ingestion failed");
                    report.failed += 1;
                }
            }
            remove_source(&path).await;
        }

        if report.discovered > 0 {
            info!(
                discovered = report.discovered,
                stored = report.stored,
                rejected = report.rejected,
                hash_errors = report.hash_errors,
                failed = report.failed,
                "scan cycle complete"
            );
        }
        report
    }

    /// Runs scanner cycles every `check_interval` minutes until `cancel`
    /// fires. The first cycle runs immediately.
    pub async fn run_scanner(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.read().await.scan_period();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_secs = period.as_secs(), "scanner started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.scan_once().await;
                }
                _ = cancel.cancelled() => {
                    info!("scanner shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lists_only_images_non_recursive() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        std::fs::write(dir.join("a.PNG"), b"x").unwrap();
        std::fs::write(dir.join("b.jpg"), b"x").unwrap();
        std::fs::write(dir.join("notes.txt"), b"x").unwrap();
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("sub/c.png"), b"x").unwrap();

        let files = list_watch_folder(dir).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.PNG", "b.jpg"]);
    }

    #[test]
    fn test_missing_folder_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(list_watch_folder(&tmp.path().join("nope")).unwrap().is_empty());
    }
}
