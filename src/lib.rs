//! # Forum Harness
//!
//! Incremental sync and structured analysis for discussion forums.
//!
//! Forum Harness mirrors a remote forum into a local SQLite database,
//! refetching only threads whose change signals moved, then runs each
//! captured thread through an LLM-backed analysis service to assign a
//! category and extract question/answer records.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────┐   ┌──────────────────────────┐
//! │  Forum API  │──▶│  Syncer  │──▶│ SQLite                   │
//! │ (Discourse) │   └──────────┘   │ metadata · raw · results │
//! └─────────────┘                  └────────────┬─────────────┘
//!                                               │ anti-join + claims
//!                                               ▼
//!                 ┌──────────┐   ┌──────────────────────┐
//!                 │ Analysis │◀──│ BatchCoordinator     │
//!                 │ service  │   │ N × AnalysisRunner   │
//!                 └──────────┘   └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! fh init                       # create database
//! fh sync                       # pull new and changed threads
//! fh pending                    # list threads waiting for analysis
//! fh analyze --concurrency 4    # analyze everything pending
//! fh get 4211                   # inspect one thread and its analysis
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`forum`] | Remote forum API client |
//! | [`sync`] | Incremental sync |
//! | [`work`] | Work selection and claims |
//! | [`analyzer`] | Analysis service providers |
//! | [`runner`] | Per-item analysis |
//! | [`batch`] | Batch coordination |
//! | [`sqlite_store`] | SQLite store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analyzer;
pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod failures;
pub mod forum;
pub mod get;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod runner;
pub mod sqlite_store;
pub mod stats;
pub mod sync;
pub mod work;

pub use forum_harness_core::{analysis, change, models, store};
