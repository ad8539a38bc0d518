//! # Vault Index
//!
//! An incrementally-updated chunk and embedding index over a vault of plain
//! text notes, with composite-scored, token-budgeted retrieval for AI agents.
//!
//! The index is kept consistent with the vault by content hash: unchanged
//! documents are never re-chunked or re-embedded, changed documents have
//! their chunk set replaced atomically, and deleted documents disappear.
//! When no embedding provider is reachable the engine degrades to lite
//! mode, storing chunks without vectors and answering queries by keyword.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ Vault (fs)  │──▶│  Reindexer   │──▶│  Store        │
//! │ + watcher   │   │ hash → chunk │   │ SQLite / mem  │
//! └─────────────┘   │ → embed      │   └──────┬────────┘
//!                   └──────────────┘          │
//!                                             ▼
//!                                     ┌───────────────┐
//!                                     │  Retriever    │
//!                                     │ score+budget  │
//!                                     └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vidx init                     # create database
//! vidx index                    # incremental reindex of the vault
//! vidx search "deploy key rotation"
//! vidx watch                    # follow vault changes
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`vault`] | Vault enumeration and path filtering |
//! | [`document`] | Loading and annotating source files |
//! | [`chunk`] | Heading-aware chunking and token estimates |
//! | [`change`] | Content hashing and change classification |
//! | [`embedding`] | Embedding providers and the degrading orchestrator |
//! | [`store`] | Storage trait with SQLite and in-memory backends |
//! | [`reindex`] | Full, lite and path-scoped reindexing |
//! | [`retrieve`] | Composite scoring and budgeted retrieval |
//! | [`watch`] | Filesystem watcher feeding the reindexer |
//! | [`progress`] | Reindex progress reporting |
//! | [`stats`] | Index statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod change;
pub mod chunk;
pub mod config;
pub mod db;
pub mod document;
pub mod embedding;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod reindex;
pub mod retrieve;
pub mod stats;
pub mod store;
pub mod vault;
pub mod watch;
