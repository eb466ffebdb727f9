//! Database layer for warden
//!
//! This module provides the Pattern Store using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries
//! - Atomic run records

pub mod repo;
pub mod schema;

pub use repo::Database;
