//! # Dataset Search
//!
//! Keeps a local cache of an open-data catalogue in step with the remote
//! catalogue, and answers natural-language queries with one result per
//! dataset, backed by an external vector store and an optional language
//! model.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Catalogue  │──▶│    Sync     │──▶│  File cache  │──▶ (external indexer)
//! │ API + host │   │ diff+reconc.│   │ + metadata   │
//! └────────────┘   └─────────────┘   └──────┬───────┘
//!                                           │ enrich
//! ┌────────────┐   ┌─────────────┐   ┌──────▼───────┐
//! │ CLI / HTTP │──▶│  Pipeline   │──▶│ Vector store │
//! │ (dsearch)  │   │ group+sess. │   │  (HTTP)      │
//! └────────────┘   └─────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dsearch init
//! dsearch sync
//! dsearch search "retail centres" --top-k 5
//! dsearch serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`catalogue`] | Catalogue API client and record parsing |
//! | [`diff`] | Snapshot change detection |
//! | [`metadata`] | Persisted snapshot and resource list |
//! | [`file_host`] | Authenticated file downloads |
//! | [`cache`] | File cache reconciliation |
//! | [`sync`] | One sync run, serialized |
//! | [`retriever`] | Vector store client |
//! | [`generator`] | Language model client |
//! | [`sqlite_store`] | Durable results sessions |
//! | [`services`] | Config-to-component wiring |
//! | [`search`] | CLI query commands |
//! | [`status`] | Local state overview |
//! | [`server`] | HTTP server |
//! | [`db`] | Session database connection and schema |

pub mod cache;
pub mod catalogue;
pub mod config;
pub mod db;
pub mod diff;
pub mod file_host;
pub mod generator;
pub mod metadata;
pub mod progress;
pub mod retriever;
pub mod search;
pub mod server;
pub mod services;
pub mod sqlite_store;
pub mod status;
pub mod sync;
