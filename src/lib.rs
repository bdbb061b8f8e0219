//! # Meme Stash
//!
//! A classification cache and retention engine for chat meme images.
//!
//! Images arrive from inbound chat messages or from a polled watch folder,
//! are classified into an emotion category by an external oracle (with
//! results cached per content fingerprint), and are kept in a
//! capacity-bounded library that can be queried by category, emotion, tag or
//! description.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────────┐   ┌──────────────┐
//! │ Chat host   │──▶│ Ingestion pipeline        │──▶│ Store + Index│
//! │ Watch folder│   │ hash → cache/oracle →     │   │ raw/ + JSON  │
//! └─────────────┘   │ moderate → save → evict   │   └──────┬───────┘
//!                   └──────────────────────────┘          │
//!                        ┌─────────────────────────────────┤
//!                        ▼                                 ▼
//!                   ┌──────────┐                     ┌──────────┐
//!                   │   CLI    │                     │   HTTP   │
//!                   │ (stash)  │                     │  query   │
//!                   └──────────┘                     └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! stash init                     # create the data directory
//! stash ingest ./funny.png       # classify and store one image
//! stash scan                     # drain the watch folder once
//! stash emotion 开心             # pick a matching meme
//! stash serve                    # scanner loop + HTTP query server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | `config.json` parsing and defaults |
//! | [`db`] | Data directory layout and JSON tables |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`hasher`] | Content fingerprints |
//! | [`cache`] | Fingerprint → description/emotion cache |
//! | [`store`] | Raw archive and per-category working set |
//! | [`index`] | Storage id → record index |
//! | [`capacity`] | Eviction policy |
//! | [`oracle`] | Classification oracle abstraction |
//! | [`host`] | Outgoing delivery collaborator |
//! | [`aliases`] | Destination aliases |
//! | [`engine`] | Shared state and collaborators |
//! | [`ingest`] | Ingestion pipeline |
//! | [`scanner`] | Watch-folder task |
//! | [`retrieval`] | Queries and delivery paths |
//! | [`server`] | HTTP query surface |

pub mod aliases;
pub mod cache;
pub mod capacity;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod host;
pub mod index;
pub mod ingest;
pub mod models;
pub mod oracle;
pub mod retrieval;
pub mod scanner;
pub mod server;
pub mod store;
