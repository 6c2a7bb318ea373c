//! Database module for linewatch.
//!
//! Provides SQLite storage for the entity population and status records.

mod models;
mod store;

pub use models::*;
pub use store::*;
