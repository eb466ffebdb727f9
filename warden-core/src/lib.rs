//! # warden-core
//!
//! Core library for warden - a log-driven repair agent for a ledger daemon.
//!
//! This library provides:
//! - Domain types for log clusters, patterns and runs
//! - The Pattern Store (SQLite)
//! - Configuration management and logging infrastructure
//! - Clients for the log store, language model, GitHub and email
//! - The pipeline stages and the run orchestrator
//!
//! ## Pipeline
//!
//! Each run reads a trailing window of warning/error/fatal entries and moves
//! every cluster through:
//! - **Cluster Extractor:** structural grouping, then semantic merging
//! - **Deduplicator:** exact slug match, then semantic similarity
//! - **Fix Planner:** module hints, transient markers, model verdict
//! - **Fix Generator:** minimal patch confined to the supplied files
//! - **Publisher:** branch + pull request, or a benign-decision email
//!
//! ## Example
//!
//! ```rust,no_run
//! use warden_core::{Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use judge::SemanticJudge;
pub use orchestrator::{ClusterOutcome, Orchestrator, RunSummary};
pub use types::*;

// Public modules
pub mod checkout;
pub mod cluster;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod fixgen;
pub mod judge;
pub mod llm;
pub mod logging;
pub mod logs;
pub mod notify;
pub mod orchestrator;
pub mod planner;
pub mod publisher;
pub mod source_control;
pub mod types;
