//! SQLite backend for TRN allocation and the person search index.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every write is a `BEGIN IMMEDIATE`
//! [`UnitOfWork`]; source writes and the index resync they trigger commit or
//! roll back together.

mod encode;
mod queries;
mod schema;
mod store;
mod unit_of_work;

pub mod config;
pub mod error;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use store::SqliteStore;
pub use unit_of_work::UnitOfWork;

#[cfg(test)]
mod tests;
