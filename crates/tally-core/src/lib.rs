//! Core types and services for the Tally survey store.
//!
//! This crate holds the data model, the storage abstraction, and the
//! services built on it: deduplicating entity creation, cascading deletes,
//! publishing, authoring, and change-driven live queries. It knows nothing
//! about HTTP or SQL; `tally-store-sqlite` and `tally-api` build on it.

pub mod authoring;
pub mod cascade;
pub mod context;
pub mod dedup;
pub mod error;
pub mod live;
pub mod memory;
pub mod model;
pub mod plan;
pub mod publish;
pub mod store;

pub use context::Context;
pub use error::{Error, Result};
