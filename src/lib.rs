//! # pagewise
//!
//! Queue-driven URL summarization with a per-task semantic index and
//! grounded follow-up chat.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────────────────┐
//! │ producer │──▶│  task queue  │──▶│ consumer              │
//! │ CLI/HTTP │   │   (SQLite)   │   │ scrape → ingest →     │
//! └──────────┘   └──────────────┘   │ summary → sentiment   │
//!                                   └──────────┬────────────┘
//!                                              ▼
//!                 ┌──────────┐   ┌───────────────────────────┐
//!                 │   chat   │◀─▶│ record store + vector idx │
//!                 │ (HTTP)   │   │         (SQLite)          │
//!                 └──────────┘   └───────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | SQLite pool and schema |
//! | [`sqlite_store`] | SQLite record store and vector index |
//! | [`queue`] | In-memory and SQLite task queues |
//! | [`model_client`] | Ollama / OpenAI model client |
//! | [`scrape`] | URL fetch and HTML text extraction |
//! | [`ingest`] | Chunk → embed → index |
//! | [`retrieve`] | Task-scoped context retrieval |
//! | [`conversation`] | Per-task chat memory |
//! | [`article`] | Summary and sentiment generation |
//! | [`status`] | Status transitions with URL mirroring |
//! | [`consumer`] | The task-processing loop |
//! | [`readiness`] | Model readiness poller |
//! | [`producer`] | Enqueue a URL |
//! | [`stats`] | Queue and task counters |
//! | [`server`] | HTTP front door |
//! | [`app`] | Service wiring |

pub mod app;
pub mod article;
pub mod config;
pub mod consumer;
pub mod conversation;
pub mod db;
pub mod ingest;
pub mod migrate;
pub mod model_client;
pub mod producer;
pub mod queue;
pub mod readiness;
pub mod retrieve;
pub mod scrape;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod status;
