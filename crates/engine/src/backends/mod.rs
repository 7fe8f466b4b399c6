//! Database Backend Abstractions
//!
//! Capability traits consumed by the engine, plus the PostgreSQL adapter.

pub mod core;
pub mod postgres;

// Re-export core traits and types
pub use core::*;
pub use postgres::{PostgresBackend, PostgresConnection};
