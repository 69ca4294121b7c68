//! # pagewise core
//!
//! Shared, runtime-agnostic logic for pagewise: task and chunk models, the
//! word-boundary chunker, embedding normalization, and the collaborator
//! traits the pipeline is written against.
//!
//! This crate contains no tokio, sqlx, or network code. In-memory
//! implementations of [`store::RecordStore`] and [`index::VectorIndex`] are
//! included for tests and single-process use.

pub mod chunk;
pub mod embedding;
pub mod index;
pub mod model;
pub mod models;
pub mod queue;
pub mod store;
