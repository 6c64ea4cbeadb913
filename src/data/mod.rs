//! Data layer module
//!
//! Handles all local persistence:
//! - Entity tables (teas, growth and health records)
//! - Sync queue of pending mutations
//! - Expiring key/value cache

mod cache;
mod database;
mod models;
mod queue;

pub use cache::{CACHE_VERSION, SweepReport};
pub use database::Database;
pub(crate) use database::upsert_row;
pub use models::*;
