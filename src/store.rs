//! Two-tier image storage.
//!
//! Every saved image is written twice: once into the immutable `raw/`
//! archive and once into `categories/<category>/`, the working set that
//! retrieval and eviction operate on. The working-set path is the storage id.

use rand::Rng;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::db::DataPaths;
use crate::error::{Result, StashError};

const MAX_NAME_ATTEMPTS: u32 = 16;

pub struct Store {
    raw_dir: PathBuf,
    categories_dir: PathBuf,
    categories: Vec<String>,
    catch_all: String,
}

impl Store {
    pub fn new(paths: &DataPaths, categories: Vec<String>, catch_all: String) -> Self {
        Self {
            raw_dir: paths.raw_dir.clone(),
            categories_dir: paths.categories_dir.clone(),
            categories,
            catch_all,
        }
    }

    fn category_dir(&self, category: &str) -> PathBuf {
        let name = if self.categories.iter().any(|c| c == category) {
            category
        } else {
            &self.catch_all
        };
        self.categories_dir.join(name)
    }

    /// Writes `bytes` into the raw archive and the category working set,
    /// returning the working-set path as the storage id.
    ///
    /// Existing files are never overwritten: on a name collision in either
    /// tier a new suffix is drawn, with an attempt counter appended after the
    /// first try so a repeating random source still terminates.
    pub fn save(
        &self,
        bytes: &[u8],
        category: &str,
        ext: &str,
        now_millis: i64,
        rng: &mut impl Rng,
    ) -> Result<String> {
        std::fs::create_dir_all(&self.raw_dir)
            .map_err(|e| StashError::persistence(&self.raw_dir, e))?;
        let cat_dir = self.category_dir(category);
        std::fs::create_dir_all(&cat_dir).map_err(|e| StashError::persistence(&cat_dir, e))?;

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let suffix: u32 = rng.random_range(1000..10000);
            let name = if attempt == 0 {
                format!("{}_{}{}", now_millis, suffix, ext)
            } else {
                format!("{}_{}_{}{}", now_millis, suffix, attempt, ext)
            };

            let raw_dest = self.raw_dir.join(&name);
            if !write_new(&raw_dest, bytes)? {
                debug!(name = %name, "raw archive name taken, retrying");
                continue;
            }

            let cat_dest = cat_dir.join(&name);
            if !write_new(&cat_dest, bytes)? {
                debug!(name = %name, "working-set name taken, retrying");
                let _ = std::fs::remove_file(&raw_dest);
                continue;
            }

            debug!(id = %cat_dest.display(), "image stored");
            return Ok(cat_dest.to_string_lossy().to_string());
        }

        Err(StashError::persistence(
            &cat_dir,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "no free storage name after retries",
            ),
        ))
    }

    /// All regular files in a category's working set, sorted.
    pub fn list(&self, category: &str) -> Result<Vec<String>> {
        let cat_dir = self.category_dir(category);
        std::fs::create_dir_all(&cat_dir).map_err(|e| StashError::persistence(&cat_dir, e))?;

        let mut ids = Vec::new();
        let entries =
            std::fs::read_dir(&cat_dir).map_err(|e| StashError::persistence(&cat_dir, e))?;
        for entry in entries.flatten() {
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_file {
                ids.push(entry.path().to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Removes a working-set file. Already-gone files are not an error.
    pub fn delete(&self, id: &str) -> Result<()> {
        match std::fs::remove_file(id) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StashError::persistence(id, e)),
        }
    }

    pub fn exists(&self, id: &str) -> bool {
        Path::new(id).is_file()
    }

    pub fn is_known_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }
}

/// Creates `path` and writes `bytes` to it. Returns `Ok(false)` when the
/// file already exists; it is left untouched.
fn write_new(path: &Path, bytes: &[u8]) -> Result<bool> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(StashError::persistence(path, e)),
    };
    file.write_all(bytes)
        .map_err(|e| StashError::persistence(path, e))?;
    Ok(true)
}

/// Normalizes a caller-supplied extension hint to `.ext`.
///
/// Only ASCII alphanumeric hints are accepted; anything else (empty, path
/// separators, dots) yields `None` so the caller sniffs the bytes instead.
pub fn sanitize_extension(hint: &str) -> Option<String> {
    let ext = hint.strip_prefix('.').unwrap_or(hint);
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!(".{}", ext.to_ascii_lowercase()))
}

/// Picks a file extension (with leading dot) for stored bytes.
///
/// Uses the source path's extension when present, otherwise sniffs common
/// image signatures and falls back to `.jpg`.
pub fn extension_for(source: Option<&Path>, bytes: &[u8]) -> String {
    if let Some(ext) = source
        .and_then(|p| p.extension())
        .map(|e| e.to_string_lossy().to_lowercase())
        .filter(|e| !e.is_empty())
    {
        return format!(".{}", ext);
    }
    let sniffed = if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        "png"
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        "gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "webp"
    } else if bytes.starts_with(b"BM") {
        "bmp"
    } else {
        "jpg"
    };
    format!(".{}", sniffed)
}
