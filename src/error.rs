//! Error taxonomy for the stash engine.
//!
//! Unreadable input is reported as an ingestion outcome rather than an
//! error. Oracle failures are degraded to catch-all classification by the
//! pipeline, and table persistence failures are logged while the in-memory
//! state stays authoritative. Only a failed store write aborts an ingestion.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the stash engine's components.
#[derive(Debug, Error)]
pub enum StashError {
    /// No oracle provider could be resolved, or the call failed.
    #[error("oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// A file in the data directory could not be written or removed.
    #[error("persistence error at {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted table could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StashError {
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StashError::Persistence {
            path: path.into(),
            source,
        }
    }

    pub fn oracle(message: impl std::fmt::Display) -> Self {
        StashError::OracleUnavailable(message.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StashError>;
