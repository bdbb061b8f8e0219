//! Outgoing side of the chat platform.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// Delivers stored images to a destination address.
///
/// The chat platform integration implements this; the engine only decides
/// *what* to send and *where*.
#[async_trait]
pub trait Host: Send + Sync {
    async fn send_image(&self, destination: &str, image: &Path) -> Result<()>;
}

/// Host that prints deliveries to stdout. Used by the CLI.
pub struct StdoutHost;

#[async_trait]
impl Host for StdoutHost {
    async fn send_image(&self, destination: &str, image: &Path) -> Result<()> {
        println!("send {} -> {}", image.display(), destination);
        Ok(())
    }
}
