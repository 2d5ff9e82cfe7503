//! Ontoact storage crate - SQLite persistence for action execution records.
//!
//! Provides a WAL-mode SQLite database with migrations and the
//! `ExecutionRepository` backing the execution log.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::ExecutionRepository;
