//! SQLite-backed storage implementation.

mod collision;
mod config;
mod counters;
mod dependencies;
mod dirty;
mod events;
mod invariants;
mod issues;
mod labels;
mod ready;
pub mod schema;
mod snapshot;
mod store;
mod transaction;

pub use store::SqliteStore;
