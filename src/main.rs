//! # Meme Stash CLI (`stash`)
//!
//! The `stash` binary is the primary interface for the meme stash. It
//! provides commands for initializing the data directory, ingesting images,
//! draining the watch folder, querying the library, and running the scanner
//! together with the HTTP query server.
//!
//! ## Usage
//!
//! ```bash
//! stash --data-dir ./data <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `stash init` | Create the data directory layout and default config |
//! | `stash ingest <files>` | Classify and store image files |
//! | `stash scan` | Run one watch-folder cycle |
//! | `stash watch` | Run the scanner until Ctrl+C |
//! | `stash serve` | Scanner plus HTTP query server |
//! | `stash status` | Library size against capacity |
//! | `stash random` | Random sample of records |
//! | `stash emotion <label>` | Pick a record by emotion or tag |
//! | `stash describe <text>` | Pick a record by description |
//! | `stash send [category]` | Pick a random file of a category |
//! | `stash push <category>` | Deliver to an alias destination |
//! | `stash alias ...` | Manage destination aliases |

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use meme_stash::engine::Engine;
use meme_stash::host::StdoutHost;
use meme_stash::models::{EventContext, ImageSource, IngestOutcome};
use meme_stash::server::run_server;

/// Meme Stash CLI: a classification cache and retention engine for chat
/// meme images.
#[derive(Parser)]
#[command(
    name = "stash",
    about = "Meme Stash: classify, deduplicate and retain chat meme images",
    version
)]
struct Cli {
    /// Data directory holding the index, caches, config and images.
    #[arg(long, global = true, default_value = "./data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, default config and empty tables.
    ///
    /// Idempotent: running it again keeps existing data.
    Init,

    /// Classify and store image files. The files are left in place.
    Ingest {
        /// Image files to ingest.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Run one watch-folder cycle and print the tally.
    Scan,

    /// Run the watch-folder scanner until interrupted.
    Watch,

    /// Run the scanner and the HTTP query server until interrupted.
    Serve {
        /// Override the bind address from config.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Show library size against capacity.
    Status,

    /// Print a random sample of records.
    Random {
        #[arg(short, long, default_value_t = 1)]
        n: usize,
    },

    /// Pick a random record by emotion label or exact tag.
    Emotion { label: String },

    /// Pick a random record whose description (or a tag) contains the text.
    Describe { text: String },

    /// Pick a random working-set file of a category.
    Send {
        #[arg(default_value = "")]
        category: String,
    },

    /// Deliver a random image of a category to an alias destination.
    Push {
        category: String,
        #[arg(long)]
        alias: Option<String>,
        /// Destination used when no alias is given.
        #[arg(long, default_value = "local")]
        origin: String,
    },

    /// Simulate an outgoing bot reply and maybe attach a matching meme.
    Reply {
        text: String,
        #[arg(long)]
        to: String,
        /// Conversation provider id used for text classification.
        #[arg(long)]
        provider: Option<String>,
    },

    /// List distinct emotion labels.
    Emotions,

    /// List distinct descriptions.
    Descriptions,

    /// Turn ingestion on.
    On,
    /// Turn ingestion off.
    Off,
    /// Turn unsolicited sends on.
    AutoOn,
    /// Turn unsolicited sends off.
    AutoOff,

    /// Pin the provider used for image calls.
    SetVision { provider_id: String },
    /// Pin the provider used for text calls.
    SetText { provider_id: String },
    /// Show the pinned providers.
    Providers,

    /// Manage destination aliases.
    Alias {
        #[command(subcommand)]
        action: AliasAction,
    },
}

#[derive(Subcommand)]
enum AliasAction {
    /// Bind an alias to a destination address.
    Bind { alias: String, destination: String },
    /// Remove an alias.
    Unbind { alias: String },
    /// List aliases.
    List,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("meme_stash=info,stash=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancelled on Ctrl+C (and SIGTERM on unix).
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
                        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                    }
                }
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("received SIGINT, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received Ctrl+C, shutting down");
        }

        token_clone.cancel();
    });

    token
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let engine = Arc::new(Engine::open(&cli.data_dir)?);

    match cli.command {
        Commands::Init => {
            println!("initialized {}", engine.root().display());
        }
        Commands::Ingest { files } => {
            let mut stored = 0usize;
            for file in files {
                // Passed as bytes so rejected inputs are not deleted.
                let data = match tokio::fs::read(&file).await {
                    Ok(data) => data,
                    Err(e) => {
                        println!("unreadable {}: {}", file.display(), e);
                        continue;
                    }
                };
                let ext = file
                    .extension()
                    .map(|e| e.to_string_lossy().to_string());
                match engine.ingest(None, ImageSource::Bytes { data, ext }).await {
                    Ok(IngestOutcome::Stored(id)) => {
                        stored += 1;
                        println!("stored   {} -> {}", file.display(), id);
                    }
                    Ok(IngestOutcome::Rejected) => println!("rejected {}", file.display()),
                    Ok(IngestOutcome::HashError) => println!("unreadable {}", file.display()),
                    Err(e) => println!("failed   {}: {}", file.display(), e),
                }
            }
            println!("ingested: {}", stored);
        }
        Commands::Scan => {
            let report = engine.scan_once().await;
            if report.skipped {
                println!("scan skipped (disabled)");
            } else {
                println!("scan");
                println!("  discovered: {}", report.discovered);
                println!("  stored: {}", report.stored);
                println!("  rejected: {}", report.rejected);
                println!("  unreadable: {}", report.hash_errors);
                println!("  failed: {}", report.failed);
            }
        }
        Commands::Watch => {
            let cancel = install_signal_handler();
            engine.clone().run_scanner(cancel).await;
        }
        Commands::Serve { bind } => {
            let cancel = install_signal_handler();
            let bind = match bind {
                Some(b) => b,
                None => engine.config().await.server_bind,
            };
            let scanner = tokio::spawn(engine.clone().run_scanner(cancel.clone()));
            run_server(engine.clone(), &bind, cancel.clone()).await?;
            cancel.cancel();
            scanner.await?;
        }
        Commands::Status => {
            let status = engine.status().await;
            println!("current_count:    {}", status.current_count);
            println!("max_count:        {}", status.max_count);
            println!("available_emojis: {}", status.available_emojis);
            let (descriptions, emotions) = engine.cache_entries().await;
            println!("cached:           {} descriptions, {} emotions", descriptions, emotions);
        }
        Commands::Random { n } => {
            let sample = engine.random_sample(n).await;
            if sample.is_empty() {
                println!("library is empty");
            }
            for item in sample {
                println!("{}\t{}\t{}", item.id, item.emotion, item.description);
            }
        }
        Commands::Emotion { label } => match engine.by_emotion(&label).await {
            Some(record) => println!("{}", record.id),
            None => bail!("not found: {}", label),
        },
        Commands::Describe { text } => match engine.by_description(&text).await {
            Some(record) => println!("{}", record.id),
            None => bail!("not found: {}", text),
        },
        Commands::Send { category } => {
            let path = engine.send_category(&category).await?;
            println!("{}", path.display());
        }
        Commands::Push {
            category,
            alias,
            origin,
        } => {
            engine
                .push(&category, alias.as_deref(), &origin, &StdoutHost)
                .await?;
        }
        Commands::Reply { text, to, provider } => {
            let ctx = EventContext {
                origin: to,
                provider_id: provider,
            };
            if engine.auto_reply(&ctx, &text, &StdoutHost).await.is_none() {
                println!("no meme attached");
            }
        }
        Commands::Emotions => {
            for e in engine.emotions().await {
                println!("{}", e);
            }
        }
        Commands::Descriptions => {
            for d in engine.descriptions().await {
                println!("{}", d);
            }
        }
        Commands::On => {
            engine.set_enabled(true).await;
            println!("ingestion enabled");
        }
        Commands::Off => {
            engine.set_enabled(false).await;
            println!("ingestion disabled");
        }
        Commands::AutoOn => {
            engine.set_auto_send(true).await;
            println!("auto send enabled");
        }
        Commands::AutoOff => {
            engine.set_auto_send(false).await;
            println!("auto send disabled");
        }
        Commands::SetVision { provider_id } => {
            engine.set_vision_provider(&provider_id).await;
            println!("vision provider: {}", provider_id);
        }
        Commands::SetText { provider_id } => {
            engine.set_text_provider(&provider_id).await;
            println!("text provider: {}", provider_id);
        }
        Commands::Providers => {
            let (vision, text) = engine.providers().await;
            println!("vision: {}", vision.as_deref().unwrap_or("(conversation)"));
            println!("text:   {}", text.as_deref().unwrap_or("(conversation)"));
        }
        Commands::Alias { action } => match action {
            AliasAction::Bind { alias, destination } => {
                engine.bind_alias(&alias, &destination).await;
                println!("bound {} -> {}", alias, destination);
            }
            AliasAction::Unbind { alias } => {
                if engine.unbind_alias(&alias).await {
                    println!("unbound {}", alias);
                } else {
                    bail!("alias does not exist: {}", alias);
                }
            }
            AliasAction::List => {
                for (alias, destination) in engine.aliases().await {
                    println!("{}\t{}", alias, destination);
                }
            }
        },
    }

    Ok(())
}
