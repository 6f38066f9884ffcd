//! Core types and trait definitions for the TRS identity core.
//!
//! Covers TRN allocation from provisioned ranges and the denormalised person
//! search index. This crate is free of database dependencies; storage
//! backends (e.g. `trs-store-sqlite`) implement the traits in [`store`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod attribute;
pub mod error;
pub mod name;
pub mod person;
pub mod store;
pub mod synonym;
pub mod trn;

pub use error::{Error, Result};
