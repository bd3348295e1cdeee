//! # Forum Harness Core
//!
//! Shared, runtime-agnostic logic for Forum Harness: data models, change
//! detection, analysis request/response handling, and the storage traits
//! the sync and analysis pipelines are written against.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The SQLite
//! store and the network clients live in the `forum-harness` crate.

pub mod analysis;
pub mod change;
pub mod models;
pub mod store;
